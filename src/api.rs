pub mod run_state_dto;
pub mod settings_dto;
