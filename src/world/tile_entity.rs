use serde_json::Value;

/// State attached to a single tile, e.g. a chest or sign.
///
/// The engine treats the payload as opaque: it round-trips through region
/// documents unchanged and only the `kind` discriminator is inspected, so
/// game code owns the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct TileEntityData {
    /// Type discriminator, e.g. `"chest"`.
    pub kind: String,
    /// Opaque per-kind state.
    pub payload: Value,
}

impl TileEntityData {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_is_preserved_verbatim() {
        let te = TileEntityData::new("chest", json!({"slots": [1, 2, 3]}));
        assert_eq!(te.kind, "chest");
        assert_eq!(te.payload["slots"][2], 3);
    }
}
