pub mod machines;
pub mod naming;
pub mod upgrade;
pub mod validation;
