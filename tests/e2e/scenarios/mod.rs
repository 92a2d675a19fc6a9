mod lifecycle_chain;
mod permissions;
mod reindex;
mod retention_sweep;
mod sessions;
mod temporal_values;
