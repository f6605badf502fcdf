//! The event-table collaborator interface (§6): consumed, not defined here.
//!
//! Gate state needs a column-major source of per-event parameter values. A
//! real implementation (an FCS reader, a compensated-event store, ...) lives
//! outside this crate; this module only specifies the trait it must satisfy.

#[cfg(test)]
use crate::error::GateError;
use crate::error::Result;

/// A column-major table of per-event parameter values.
pub trait EventTable: std::fmt::Debug {
    fn num_events(&self) -> usize;
    fn num_parameters(&self) -> u32;
    fn is_parameter(&self, name: &str) -> bool;
    /// Index of `name`. Fails with `InvalidArgument` if absent.
    fn parameter_index(&self, name: &str) -> Result<u32>;
    fn parameter_name(&self, i: u32) -> &str;
    fn is_floats_not_doubles(&self) -> bool;
    fn parameter_values_f32(&self, i: u32) -> &[f32];
    fn parameter_values_f64(&self, i: u32) -> &[f64];
    fn parameter_long_name(&self, i: u32) -> &str;
    fn parameter_min(&self, i: u32) -> f64;
    fn parameter_max(&self, i: u32) -> f64;
    fn parameter_data_min(&self, i: u32) -> f64;
    fn parameter_data_max(&self, i: u32) -> f64;
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct InMemoryEventTable {
    names: Vec<String>,
    long_names: Vec<String>,
    columns: Vec<Vec<f32>>,
    min: Vec<f64>,
    max: Vec<f64>,
    data_min: Vec<f64>,
    data_max: Vec<f64>,
    index: std::collections::HashMap<String, usize>,
}

#[cfg(test)]
impl InMemoryEventTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(
        mut self,
        name: impl Into<String>,
        values: Vec<f32>,
        min: f64,
        max: f64,
    ) -> Self {
        let name = name.into();
        self.index.insert(name.clone(), self.names.len());
        let data_min = values.iter().copied().fold(f32::INFINITY, f32::min) as f64;
        let data_max = values
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max) as f64;
        self.long_names.push(name.clone());
        self.names.push(name);
        self.columns.push(values);
        self.min.push(min);
        self.max.push(max);
        self.data_min.push(data_min);
        self.data_max.push(data_max);
        self
    }
}

#[cfg(test)]
impl EventTable for InMemoryEventTable {
    fn num_events(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    fn num_parameters(&self) -> u32 {
        self.names.len() as u32
    }

    fn is_parameter(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn parameter_index(&self, name: &str) -> Result<u32> {
        self.index
            .get(name)
            .map(|&i| i as u32)
            .ok_or_else(|| GateError::invalid_argument(format!("unknown parameter '{name}'")))
    }

    fn parameter_name(&self, i: u32) -> &str {
        &self.names[i as usize]
    }

    fn is_floats_not_doubles(&self) -> bool {
        true
    }

    fn parameter_values_f32(&self, i: u32) -> &[f32] {
        &self.columns[i as usize]
    }

    fn parameter_values_f64(&self, _i: u32) -> &[f64] {
        &[]
    }

    fn parameter_long_name(&self, i: u32) -> &str {
        &self.long_names[i as usize]
    }

    fn parameter_min(&self, i: u32) -> f64 {
        self.min[i as usize]
    }

    fn parameter_max(&self, i: u32) -> f64 {
        self.max[i as usize]
    }

    fn parameter_data_min(&self, i: u32) -> f64 {
        self.data_min[i as usize]
    }

    fn parameter_data_max(&self, i: u32) -> f64 {
        self.data_max[i as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        let table = InMemoryEventTable::new()
            .with_column("FSC-A", vec![1.0, 2.0, 3.0], 0.0, 100.0)
            .with_column("SSC-A", vec![4.0, 5.0, 6.0], 0.0, 100.0);

        assert_eq!(table.num_events(), 3);
        assert_eq!(table.num_parameters(), 2);
        assert!(table.is_parameter("SSC-A"));
        assert_eq!(table.parameter_index("SSC-A").unwrap(), 1);
        assert!(table.parameter_index("nope").is_err());
        assert_eq!(table.parameter_values_f32(0), &[1.0, 2.0, 3.0]);
    }
}
