use serde::{Deserialize, Serialize};

/// Opaque identifier of one user's session (the chat id on Telegram).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub i64);

impl ConversationId {
    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl From<i64> for ConversationId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ConversationId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_bare_number() {
        let id = ConversationId(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        let parsed: ConversationId = serde_json::from_str("42").unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parses_from_str() {
        assert_eq!(" -1001 ".parse::<ConversationId>().unwrap(), ConversationId(-1001));
        assert!("abc".parse::<ConversationId>().is_err());
    }
}
