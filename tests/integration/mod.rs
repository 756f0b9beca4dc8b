
mod context_manager;
mod sync_engine;
