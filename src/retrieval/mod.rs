//! 混合检索：精确引用识别 + 词法（TF-IDF 风格）打分 + 向量余弦相似度

pub mod engine;
pub mod lexical;

pub use engine::{Document, RetrievalEngine, SearchMethod, SearchOptions, SearchResult};
pub use lexical::is_exact_reference;
