use crate::core::{DriverError, Result, ValueHolder};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Converts application values to and from their wire representation.
///
/// The driver never looks inside a [`ValueHolder`]; it only hashes the bytes
/// for the commit digest. Implement this trait to plug in a different
/// encoding.
pub trait ValueSerializer: Send + Sync {
    fn serialize(&self, value: &serde_json::Value) -> Result<ValueHolder>;

    fn deserialize(&self, holder: &ValueHolder) -> Result<serde_json::Value>;
}

/// Encodes values as UTF-8 JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl ValueSerializer for JsonSerializer {
    fn serialize(&self, value: &serde_json::Value) -> Result<ValueHolder> {
        Ok(ValueHolder::new(serde_json::to_vec(value)?))
    }

    fn deserialize(&self, holder: &ValueHolder) -> Result<serde_json::Value> {
        serde_json::from_slice(holder.as_bytes()).map_err(|err| {
            DriverError::Serialization(format!("malformed value: {}", err))
        })
    }
}

/// Serializes a typed value through `serializer`.
pub fn to_holder<T: Serialize + ?Sized>(
    serializer: &dyn ValueSerializer,
    value: &T,
) -> Result<ValueHolder> {
    let json = serde_json::to_value(value)?;
    serializer.serialize(&json)
}

/// Deserializes a typed value through `serializer`.
pub fn from_holder<T: DeserializeOwned>(
    serializer: &dyn ValueSerializer,
    holder: &ValueHolder,
) -> Result<T> {
    let json = serializer.deserialize(holder)?;
    Ok(serde_json::from_value(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Vehicle {
        vin: String,
        year: u16,
    }

    #[test]
    fn test_typed_value_through_json() {
        let car = Vehicle {
            vin: "1N4AL11D75C109151".into(),
            year: 2011,
        };

        let holder = to_holder(&JsonSerializer, &car).unwrap();
        let back: Vehicle = from_holder(&JsonSerializer, &holder).unwrap();
        assert_eq!(back, car);
    }

    #[test]
    fn test_malformed_bytes_are_rejected() {
        let holder = ValueHolder::new(b"{not json".to_vec());
        let err = JsonSerializer.deserialize(&holder).unwrap_err();
        assert!(matches!(err, DriverError::Serialization(_)));
    }
}
