//! 意图识别：话语 → 标签 + 置信度 + 参数

pub mod cache;
pub mod classifier;
pub mod keywords;
pub mod types;

pub use cache::{ClassificationCache, TtlLruCache};
pub use classifier::{Classifier, ClassifierSettings, ClassifierStats};
pub use types::{Classification, IntentLabel};
