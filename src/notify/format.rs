//! Text shared by both platforms: category styling, file icons, change summaries.

use crate::models::{ChangeSet, Labels};

/// Emoji for an analyzer category.
pub fn category_emoji(category: &str) -> &'static str {
    match category {
        "긴급" => "🚨",
        "장학" => "💰",
        "학사" => "🎓",
        "취업" => "💼",
        "행사" => "🎉",
        "과제/시험" => "📝",
        "수상/성과" => "🏆",
        "생활관" => "🏠",
        _ => "📢",
    }
}

/// Embed colour for an analyzer category.
pub fn category_color(category: &str) -> u32 {
    match category {
        "긴급" => 0xFF0000,
        "장학" => 0xFFD700,
        "학사" => 0x0099FF,
        "취업" => 0x9B59B6,
        "행사" => 0x2ECC71,
        "과제/시험" => 0xE74C3C,
        "수상/성과" => 0xF39C12,
        "생활관" => 0x1ABC9C,
        _ => 0x95A5A6,
    }
}

/// Colour of update notices.
pub const UPDATE_COLOR: u32 = 0xFFA500;

/// Icon for a file name by extension.
pub fn file_emoji(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "📕",
        "doc" | "docx" => "📘",
        "xls" | "xlsx" => "📗",
        "ppt" | "pptx" => "📙",
        "zip" | "rar" => "📦",
        "jpg" | "jpeg" | "png" | "gif" => "🖼️",
        _ => "📄",
    }
}

/// One line per reported change, in a fixed order.
pub fn change_summary(changes: &ChangeSet, labels: &Labels) -> String {
    let mut lines = Vec::new();

    if let Some(title) = &changes.title {
        lines.push(format!("{}: {}", labels.title_changed, title));
    }
    if let Some(summary) = &changes.content_summary {
        lines.push(format!("{}: {}", labels.content_changed, summary));
    }
    for name in &changes.attachments_added {
        lines.push(format!("{}: {}", labels.attachment_added, name));
    }
    for name in &changes.attachments_removed {
        lines.push(format!("{}: {}", labels.attachment_removed, name));
    }
    if changes.attachments_changed
        && changes.attachments_added.is_empty()
        && changes.attachments_removed.is_empty()
    {
        lines.push(labels.attachments_changed.clone());
    }
    if changes.images_changed {
        lines.push(labels.images_changed.clone());
    }

    lines.join("\n")
}

/// Prefix every non-empty summary line with `- `.
pub fn bullet_lines(summary: &str) -> String {
    summary
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            if line.starts_with('-') {
                line.to_string()
            } else {
                format!("- {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Hashtag-safe form of a tag.
pub fn hashtag(tag: &str) -> String {
    format!("#{}", tag.trim().replace([' ', '/'], "_"))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn test_category_styling() {
        assert_eq!(category_emoji("장학"), "💰");
        assert_eq!(category_emoji("unknown"), "📢");
        assert_eq!(category_color("긴급"), 0xFF0000);
        assert_eq!(category_color(""), 0x95A5A6);
    }

    #[test]
    fn test_file_emoji() {
        assert_eq!(file_emoji("계획서.PDF"), "📕");
        assert_eq!(file_emoji("양식.hwp"), "📄");
        assert_eq!(file_emoji("명단.xlsx"), "📗");
        assert_eq!(file_emoji("noext"), "📄");
    }

    #[test]
    fn test_change_summary_order() {
        let labels = Labels::default();
        let changes = ChangeSet {
            title: Some("'a' -> 'b'".into()),
            content_summary: Some("기간 연장".into()),
            attachments_added: BTreeSet::from(["new.pdf".to_string()]),
            attachments_removed: BTreeSet::from(["old.pdf".to_string()]),
            attachments_changed: true,
            images_changed: true,
            ..Default::default()
        };

        let summary = change_summary(&changes, &labels);
        assert_eq!(
            summary,
            "📝 **제목 변경**: 'a' -> 'b'\n\
             📝 **내용 변경**: 기간 연장\n\
             ➕ **첨부 추가**: new.pdf\n\
             ➖ **첨부 삭제**: old.pdf\n\
             🖼️ **이미지 변경됨**"
        );
    }

    #[test]
    fn test_coarse_attachment_flag_only_without_names() {
        let labels = Labels::default();
        let changes = ChangeSet {
            attachments_changed: true,
            ..Default::default()
        };
        assert_eq!(change_summary(&changes, &labels), "📎 **첨부파일 변경**");
    }

    #[test]
    fn test_bullet_lines_and_hashtags() {
        assert_eq!(bullet_lines("첫째\n\n- 둘째\n"), "- 첫째\n- 둘째");
        assert_eq!(hashtag("과제/시험 일정"), "#과제_시험_일정");
    }
}
