//! 会话 Cookie：保持插入顺序，每次读取时重新拼接请求头。

use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct Cookies {
    entries: Mutex<Vec<(String, String)>>,
}

impl Cookies {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 `Cookie:` 请求头（可带或不带前缀）解析。
    pub fn parse(header: &str) -> Self {
        let header = header.trim();
        let header = match header.get(..7) {
            Some(prefix) if prefix.eq_ignore_ascii_case("cookie:") => header[7..].trim_start(),
            _ => header,
        };
        let cookies = Self::new();
        for part in header.split("; ") {
            cookies.set(part);
        }
        cookies
    }

    /// 设置一条 `Set-Cookie` 形式的值，只取第一个 `;` 之前的 `name=value`。
    pub fn set(&self, header_value: &str) {
        let Some((name, value)) = name_value(header_value) else {
            return;
        };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => entries.push((name.to_string(), value.to_string())),
        }
    }

    pub fn delete(&self, header_value: &str) {
        let Some((name, _)) = name_value(header_value) else {
            return;
        };
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(k, _)| k != name);
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    pub fn header_value(&self) -> String {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn name_value(header_value: &str) -> Option<(&str, &str)> {
    let pair = header_value.split(';').next().unwrap_or("").trim();
    if pair.is_empty() {
        return None;
    }
    Some(pair.split_once('=').unwrap_or((pair, "")))
}
