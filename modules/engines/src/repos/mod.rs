pub mod alerts_repo;
pub mod facts_repo;
pub mod processed_repo;
pub mod suggestions_repo;
