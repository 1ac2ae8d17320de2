pub mod patch_history;
