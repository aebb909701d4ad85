use crate::core::{IoUsage, Result, TimingInformation, ValueHolder};
use crate::serialization::{ValueSerializer, from_holder};
use serde::de::DeserializeOwned;

/// Statement values fully read into memory.
///
/// Unlike [`StatementResult`](super::StatementResult) this does not depend on
/// the session any more, so it can be returned out of a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferedResult {
    values: Vec<ValueHolder>,
    io_usage: Option<IoUsage>,
    timing: Option<TimingInformation>,
}

impl BufferedResult {
    pub fn new(
        values: Vec<ValueHolder>,
        io_usage: Option<IoUsage>,
        timing: Option<TimingInformation>,
    ) -> Self {
        Self {
            values,
            io_usage,
            timing,
        }
    }

    pub fn values(&self) -> &[ValueHolder] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValueHolder> {
        self.values.iter()
    }

    pub fn io_usage(&self) -> Option<IoUsage> {
        self.io_usage
    }

    pub fn timing_information(&self) -> Option<TimingInformation> {
        self.timing
    }

    /// Decode every value into `T`.
    pub fn decode<T: DeserializeOwned>(&self, serializer: &dyn ValueSerializer) -> Result<Vec<T>> {
        self.values
            .iter()
            .map(|holder| from_holder(serializer, holder))
            .collect()
    }
}

impl IntoIterator for BufferedResult {
    type Item = ValueHolder;
    type IntoIter = std::vec::IntoIter<ValueHolder>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a> IntoIterator for &'a BufferedResult {
    type Item = &'a ValueHolder;
    type IntoIter = std::slice::Iter<'a, ValueHolder>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::{JsonSerializer, to_holder};

    #[test]
    fn test_decode_values() {
        let values = ["a", "b"]
            .iter()
            .map(|name| to_holder(&JsonSerializer, name).unwrap())
            .collect();
        let result = BufferedResult::new(values, None, None);

        let names: Vec<String> = result.decode(&JsonSerializer).unwrap();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(result.iter().count(), 2);
        assert_eq!(result.into_iter().count(), 2);
    }
}
