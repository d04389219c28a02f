//! Emoji used by the session UI, with plain-text fallbacks.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static TOOL: Emoji<'_, '_> = Emoji("🔍 ", "[T]");
pub static GAVEL: Emoji<'_, '_> = Emoji("⚖️  ", "[V]");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "[X]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
