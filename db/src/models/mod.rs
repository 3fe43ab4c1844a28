pub mod attendance;
pub mod completion;
pub mod group;
pub mod group_member;
pub mod program;
pub mod program_event;
pub mod program_section;
pub mod signature;
pub mod user;

pub use attendance::Entity as Attendance;
pub use completion::Entity as Completion;
pub use group::Entity as Group;
pub use group_member::Entity as GroupMember;
pub use program::Entity as Program;
pub use program_event::Entity as ProgramEvent;
pub use program_section::Entity as ProgramSection;
pub use signature::Entity as Signature;
pub use user::Entity as User;
