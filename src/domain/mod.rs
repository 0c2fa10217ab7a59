pub mod capture;
pub mod codes;
pub mod reports;
pub mod token;
