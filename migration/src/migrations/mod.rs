pub mod m202510010001_create_users;
pub mod m202510010002_create_programs;
pub mod m202510010003_create_groups;
pub mod m202510010004_create_signatures;
pub mod m202510010005_create_completions;
pub mod m202510010006_create_attendances;
