pub mod integration_repository;
pub mod mock_db;
pub mod oauth_token_repository;
pub mod postgres_integration_repository;
pub mod postgres_oauth_token_repository;
pub mod postgres_user_repository;
pub mod postgres_workflow_repository;
pub mod user_repository;
pub mod workflow_repository;
