//! Вспомогательные функции для отладочного вывода.

use std::sync::OnceLock;

/// Возвращает `true`, если включена подробная диагностика активаций.
///
/// Управляется переменной окружения `GPTMOE_DEBUG` (любое непустое значение).
pub fn enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| std::env::var_os("GPTMOE_DEBUG").is_some_and(|v| !v.is_empty()))
}
