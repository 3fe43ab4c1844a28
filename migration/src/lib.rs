mod migrations;
mod migrator;

pub use migrator::Migrator;
