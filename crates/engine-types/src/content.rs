use serde::{Deserialize, Serialize};

/// A single block in a structured model response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Text { text: String },
    Other { detail: String },
}

impl Block {
    fn text(&self) -> &str {
        match self {
            Block::Text { text } => text,
            Block::Other { detail } => detail,
        }
    }
}

/// A model response is either a plain string or an ordered list of typed
/// blocks. This carries that ambiguity through the type system instead of
/// leaving it as untyped JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<Block>),
}

impl Content {
    /// Flatten to plain text: blocks are joined in order with no separator,
    /// matching the source behavior of concatenating block text verbatim.
    pub fn to_text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Blocks(blocks) => blocks.iter().map(Block::text).collect::<Vec<_>>().join(""),
        }
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Content::Text(value)
    }
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Content::Text(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_round_trips() {
        let c = Content::Text("hello".into());
        assert_eq!(c.to_text(), "hello");
    }

    #[test]
    fn blocks_join_in_order() {
        let c = Content::Blocks(vec![
            Block::Text { text: "foo".into() },
            Block::Text { text: "bar".into() },
        ]);
        assert_eq!(c.to_text(), "foobar");
    }
}
