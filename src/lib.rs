//! Intake Bot — a chat questionnaire that collects pregnancy risk factors
//! and relays doctors' verdicts back to the patient.

pub mod channels;
pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod forms;
pub mod questionnaire;
pub mod relay;
pub mod store;
