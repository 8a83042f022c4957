//! Shared status icons.
//!
//! Each icon falls back to a bracketed ASCII tag on terminals without emoji support.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

pub static PROGRESS: Emoji<'_, '_> = Emoji("📊 ", "[PROG]");
pub static BLOCKER: Emoji<'_, '_> = Emoji("🚧 ", "[BLOCK]");
pub static PIVOT: Emoji<'_, '_> = Emoji("🔄 ", "[BACK]");
pub static GATE: Emoji<'_, '_> = Emoji("🚦 ", "[GATE]");
pub static ALERT: Emoji<'_, '_> = Emoji("🔔 ", "[ALERT]");
pub static APPROVAL: Emoji<'_, '_> = Emoji("📝 ", "[APPR]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
