pub mod patch_history_repo;

pub use patch_history_repo::PatchHistoryRepo;
