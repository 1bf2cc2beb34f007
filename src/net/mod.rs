//! Kernel-facing controllers: route tables, policy rules and packet filter rules.

pub mod dns;
pub mod forwarding;
pub mod netfilter;
pub mod policy;
pub mod route_table;

pub use dns::{DnsRoute, DnsRouter};
pub use forwarding::ForwardingGuard;
pub use policy::PolicyRouter;
pub use route_table::RouteTableAllocator;
