mod agent_reply;

pub use agent_reply::*;
