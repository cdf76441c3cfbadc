use serde_json::Value;

use crate::models::TaskResult;

/// Task names and messages are Chinese; switch the Windows console to UTF-8.
#[cfg(windows)]
pub fn setup_console() {
    use windows_sys::Win32::System::Console::{
        GetStdHandle, GetConsoleMode, SetConsoleMode, SetConsoleOutputCP,
        STD_OUTPUT_HANDLE, ENABLE_VIRTUAL_TERMINAL_PROCESSING,
    };
    unsafe {
        SetConsoleOutputCP(65001);
        let handle = GetStdHandle(STD_OUTPUT_HANDLE);
        let mut mode = 0;
        if GetConsoleMode(handle, &mut mode) != 0 {
            SetConsoleMode(handle, mode | ENABLE_VIRTUAL_TERMINAL_PROCESSING);
        }
    }
}

#[cfg(not(windows))]
pub fn setup_console() {}

/// Strings print as-is, everything else as compact JSON.
pub fn render_response(response: &Value) -> String {
    match response {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn render_result(result: &TaskResult) -> String {
    let mark = if result.success { "成功" } else { "失败" };
    if result.target.is_empty() {
        format!("[{}] {}: {}", mark, result.name, render_response(&result.response))
    } else {
        format!(
            "[{}] {} ({}): {}",
            mark,
            result.name,
            result.target,
            render_response(&result.response)
        )
    }
}
