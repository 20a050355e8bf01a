//! 内置技能：search / chat / config / help / meditation / system

pub mod chat;
pub mod config;
pub mod help;
pub mod meditation;
pub mod search;
pub mod system;

use std::sync::Arc;

pub use chat::ChatSkill;
pub use config::{ConfigSkill, Settings, SettingsBackedClient, SettingsStore};
pub use help::HelpSkill;
pub use meditation::{EncodingPipeline, EncodingStage, MeditationSkill};
pub use search::SearchSkill;
pub use system::SystemSkill;

use crate::config::AppConfig;
use crate::core::BrainError;

use super::SkillRegistry;

/// 注册全部六个内置技能；返回配置技能使用的设置存储
pub async fn register_builtin_skills(
    registry: &SkillRegistry,
    cfg: &AppConfig,
) -> Result<Arc<SettingsStore>, BrainError> {
    let settings = Arc::new(SettingsStore::from_config(cfg));

    registry.register(SearchSkill::new()).await?;
    registry.register(ChatSkill::new()).await?;
    registry.register(ConfigSkill::new(Arc::clone(&settings))).await?;
    registry.register(HelpSkill::new()).await?;
    registry.register(MeditationSkill::new()).await?;
    registry.register(SystemSkill::from_config(&cfg.skills)).await?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::Priority;

    #[tokio::test]
    async fn test_builtin_registration_order() {
        let registry = SkillRegistry::new();
        register_builtin_skills(&registry, &AppConfig::default())
            .await
            .unwrap();

        let listed: Vec<(String, Priority)> = registry
            .list()
            .await
            .into_iter()
            .map(|d| (d.name, d.priority))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("search".to_string(), Priority::High),
                ("config".to_string(), Priority::High),
                ("meditation".to_string(), Priority::High),
                ("system".to_string(), Priority::High),
                ("chat".to_string(), Priority::Normal),
                ("help".to_string(), Priority::Normal),
            ]
        );
    }
}
