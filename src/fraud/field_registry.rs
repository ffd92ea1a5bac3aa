//! C1 — Field Registry.
//!
//! Maps field names to small, dense, stable slot IDs, resolved once at
//! compile time so a condition leaf never does a string lookup on the hot
//! path.

use crate::fraud::model::{FieldId, FieldType, Operator};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub id: FieldId,
    pub data_type: FieldType,
    pub allowed_operators: Vec<Operator>,
    #[serde(default)]
    pub multi_valued: bool,
    #[serde(default)]
    pub sensitive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRegistry {
    pub version: u32,
    pub fields: HashMap<String, FieldDef>,
}

impl FieldRegistry {
    pub fn resolve(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }

    pub fn slot_count(&self) -> usize {
        self.fields.values().map(|f| f.id as usize + 1).max().unwrap_or(0)
    }

    /// A fixed built-in set covering the well-known transaction attributes
    /// from spec §3, used when no field-registry artifact has been fetched
    /// yet (tests, local dev) or as the base the fetched artifact extends.
    pub fn builtin() -> Self {
        use FieldType::*;
        let defs: &[(&str, u16, FieldType)] = &[
            ("transaction_id", 0, String),
            ("card_hash", 1, String),
            ("amount", 2, Number),
            ("currency", 3, String),
            ("country_code", 4, String),
            ("merchant_category_code", 5, String),
            ("card_network", 6, String),
            ("card_bin", 7, String),
            ("card_logo", 8, String),
            ("ip_address", 9, String),
            ("device_id", 10, String),
        ];
        let mut fields = HashMap::with_capacity(defs.len());
        for (name, id, data_type) in defs {
            fields.insert(
                (*name).to_string(),
                FieldDef {
                    id: *id,
                    data_type: *data_type,
                    allowed_operators: default_operators(*data_type),
                    multi_valued: false,
                    sensitive: matches!(*name, "card_hash" | "ip_address" | "device_id"),
                },
            );
        }
        FieldRegistry { version: 1, fields }
    }
}

fn default_operators(data_type: FieldType) -> Vec<Operator> {
    use Operator::*;
    match data_type {
        FieldType::Number => vec![Eq, Ne, Gt, Gte, Lt, Lte, Between, In, NotIn, Exists],
        FieldType::String => vec![
            Eq, Ne, In, NotIn, Contains, StartsWith, EndsWith, Regex, Exists,
        ],
        FieldType::Bool => vec![Eq, Ne, Exists],
    }
}
