//! 回合层：主循环、动作协议编解码、上下文窗口、完成 / 澄清判定、生命周期事件、prompt 文本

pub mod codec;
pub mod context;
pub mod detector;
pub mod events;
pub mod loop_;
pub mod prompts;

pub use codec::{decode, DecodeContext, DecodedReply};
pub use context::ContextBuilder;
pub use detector::TurnVerdict;
pub use events::{ChannelSink, EventSink, LoopEvent, LoopEventKind, NoopSink, Severity};
pub use loop_::TurnLoop;
