//! Raw-OS glue the supervisor needs: credential transitions, capability
//! handling, per-service cgroups, and the SELinux kernel interfaces.

pub mod caps;
pub mod cgroups;
pub mod proc_attr;
pub mod selinux;
