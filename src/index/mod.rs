pub mod embedding;
pub mod inverted;
pub mod manager;
pub mod value;

pub use embedding::EmbeddingIndex;
pub use inverted::InvertedIndex;
pub use manager::IndexManager;
pub use value::ValueIndex;

/// Tokenize text into lowercase word runs (alphanumerics and underscores).
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}
