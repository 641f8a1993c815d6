pub mod integration;
pub mod oauth_token;
pub mod user;
pub mod workflow;
pub mod workflow_run;
