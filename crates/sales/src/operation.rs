use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use lotledger_core::{DomainError, SaleId};

/// Identity of one sale line as a deduction operation: `saleId#lineIndex`.
///
/// This is the idempotency key. It is derived purely from the sale document,
/// so every session and every replay computes the same id for the same line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId {
    sale_id: SaleId,
    line_index: usize,
}

impl OperationId {
    pub fn new(sale_id: SaleId, line_index: usize) -> Self {
        Self { sale_id, line_index }
    }

    pub fn sale_id(&self) -> &SaleId {
        &self.sale_id
    }

    pub fn line_index(&self) -> usize {
        self.line_index
    }
}

impl core::fmt::Display for OperationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}#{}", self.sale_id, self.line_index)
    }
}

impl FromStr for OperationId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (sale, index) = s
            .rsplit_once('#')
            .ok_or_else(|| DomainError::invalid_id(format!("OperationId: missing '#' in {s:?}")))?;
        let line_index = index
            .parse::<usize>()
            .map_err(|e| DomainError::invalid_id(format!("OperationId: {e}")))?;
        Ok(Self::new(SaleId::parse(sale)?, line_index))
    }
}

impl Serialize for OperationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OperationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_agree() {
        let op = OperationId::new(SaleId::parse("S-42").unwrap(), 3);
        assert_eq!(op.to_string(), "S-42#3");
        assert_eq!("S-42#3".parse::<OperationId>().unwrap(), op);
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert!("S-42".parse::<OperationId>().is_err());
        assert!("S-42#x".parse::<OperationId>().is_err());
        assert!("#1".parse::<OperationId>().is_err());
    }

    #[test]
    fn serializes_as_plain_string() {
        let op = OperationId::new(SaleId::parse("S-1").unwrap(), 0);
        assert_eq!(serde_json::to_value(&op).unwrap(), serde_json::json!("S-1#0"));
    }
}
