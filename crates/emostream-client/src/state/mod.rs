//! 会话状态机
//!
//! 纯函数式的 `(状态, 事件) -> (新状态, 副作用)`，不做任何 IO，
//! 由 [`Session`](crate::Session) 的工作线程执行副作用。

pub mod machine;

pub use machine::{Effect, SessionEvent, SessionMachine, SessionStatus};
