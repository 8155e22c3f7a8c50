mod experiments;
mod sessions;
