//! # Data Models
//!
//! SeaORM entities. `company` lives in the control plane; the rest live in
//! every tenant database.

pub mod category;
pub mod company;
pub mod payroll_spec;
pub mod schema_ledger;

pub use category::Entity as Category;
pub use company::Entity as Company;
pub use payroll_spec::Entity as PayrollSpec;
pub use schema_ledger::Entity as SchemaLedger;
