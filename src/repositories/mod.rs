//! # Repository Layer
//!
//! Thin wrappers over SeaORM queries. Tenant-side repositories are generic over
//! `ConnectionTrait` so the seeders can run them inside a transaction.

pub mod category;
pub mod company;
pub mod payroll_spec;

pub use category::CategoryRepository;
pub use company::CompanyRepository;
pub use payroll_spec::{PayrollSpecInput, PayrollSpecRepository};
