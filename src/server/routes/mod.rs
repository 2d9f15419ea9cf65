pub mod accounts;
pub mod antigravity;
pub mod kiro;
pub mod qwen;
