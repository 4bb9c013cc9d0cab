//! Asset record kept by the in-memory ledger.

use serde::{Deserialize, Serialize};

use crate::failure::LedgerFailure;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Asset {
    #[serde(rename = "ID")]
    pub id: String,
    pub color: String,
    pub size: u64,
    pub owner: String,
    pub appraised_value: u64,
}

impl Asset {
    /// Build from `[id, color, size, owner, appraisedValue]`.
    pub fn from_arguments(arguments: &[String]) -> Result<Self, LedgerFailure> {
        let [id, color, size, owner, value] = arguments else {
            return Err(LedgerFailure::new(format!(
                "incorrect number of arguments, expecting 5 but got {}",
                arguments.len()
            )));
        };

        Ok(Self {
            id: id.clone(),
            color: color.clone(),
            size: parse_number("size", size)?,
            owner: owner.clone(),
            appraised_value: parse_number("appraisedValue", value)?,
        })
    }

    pub fn to_payload(&self) -> Vec<u8> {
        // Plain struct of strings and integers; serialization cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

fn parse_number(field: &str, raw: &str) -> Result<u64, LedgerFailure> {
    raw.parse().map_err(|_| {
        LedgerFailure::new(format!("{field} must be a non-negative integer, got {raw:?}"))
    })
}
