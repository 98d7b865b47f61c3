pub mod ports;
pub mod update_use_case;
