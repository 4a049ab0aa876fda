pub mod alert;
pub mod alert_rule;
pub mod audit_entry;
pub mod investigation;
pub mod system_config;
