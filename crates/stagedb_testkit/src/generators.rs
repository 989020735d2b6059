//! Property-based test generators using proptest.
//!
//! Provides strategies for generating attribute values, employee records
//! and edit sequences that fit [`crate::employee_model`].

use proptest::prelude::*;
use stagedb_store::{ObjectId, Record, Value};

/// Strategy for generating object identities.
pub fn object_id_strategy() -> impl Strategy<Value = ObjectId> {
    prop::array::uniform16(any::<u8>()).prop_map(ObjectId::from_bytes)
}

/// Strategy for generating arbitrary attribute values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9..1.0e9f64).prop_map(Value::Float),
        "[a-zA-Z ]{0,16}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
    ]
}

/// Strategy for generating plausible salaries.
pub fn salary_strategy() -> impl Strategy<Value = i64> {
    0i64..1_000_000
}

/// Strategy for generating employee names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{1,11}").expect("Invalid regex")
}

/// Strategy for generating employee records with fresh identities.
pub fn employee_record_strategy() -> impl Strategy<Value = Record> {
    (object_id_strategy(), name_strategy(), salary_strategy()).prop_map(|(id, name, salary)| {
        Record::new(id, "Employee")
            .with("name", name)
            .with("salary", salary)
            .with("department", Value::Null)
    })
}

/// One edit applied to an employee inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum EmployeeEdit {
    /// Change the salary.
    Salary(i64),
    /// Change the name.
    Rename(String),
}

impl EmployeeEdit {
    /// Returns the attribute the edit writes.
    pub fn attribute(&self) -> &'static str {
        match self {
            Self::Salary(_) => "salary",
            Self::Rename(_) => "name",
        }
    }

    /// Returns the value the edit writes.
    pub fn value(&self) -> Value {
        match self {
            Self::Salary(salary) => Value::Integer(*salary),
            Self::Rename(name) => Value::Text(name.clone()),
        }
    }
}

/// Strategy for generating a single edit.
pub fn edit_strategy() -> impl Strategy<Value = EmployeeEdit> {
    prop_oneof![
        salary_strategy().prop_map(EmployeeEdit::Salary),
        name_strategy().prop_map(EmployeeEdit::Rename),
    ]
}

/// Strategy for generating a sequence of edits.
pub fn edit_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<EmployeeEdit>> {
    prop::collection::vec(edit_strategy(), 1..=max_len.max(1))
}
