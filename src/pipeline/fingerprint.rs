//! Content fingerprints.
//!
//! A fingerprint is the SHA-256 of the post's observable state: title, body,
//! the sorted image set and the sorted attachment encodings. Attachment and
//! image order never affect the result.

use sha2::{Digest, Sha256};

use crate::models::{Attachment, Post};

/// Unit separator; does not occur in ordinary text.
const SEPARATOR: &[u8] = b"\x1f";

/// Compute the hex-encoded fingerprint of a post.
pub fn fingerprint(post: &Post) -> String {
    let mut images: Vec<&str> = post.images.iter().map(String::as_str).collect();
    images.sort_unstable();
    images.dedup();

    let mut attachments: Vec<String> = post.attachments.iter().map(encode_attachment).collect();
    attachments.sort_unstable();

    let mut hasher = Sha256::new();
    let mut feed = |part: &str| {
        hasher.update(part.as_bytes());
        hasher.update(SEPARATOR);
    };

    feed(&post.title);
    feed(&post.body);
    for image in images {
        feed(image);
    }
    feed("");
    for attachment in &attachments {
        feed(attachment);
    }

    hex::encode(hasher.finalize())
}

/// `name|url|size|etag`, with a missing size encoded as `0`.
fn encode_attachment(att: &Attachment) -> String {
    format!(
        "{}|{}|{}|{}",
        att.name,
        att.url,
        att.size_bytes.unwrap_or(0),
        att.etag.as_deref().unwrap_or("")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post() -> Post {
        Post {
            source_key: "cse_notice".into(),
            external_id: "1".into(),
            title: "수강신청 안내".into(),
            body: "수강신청 기간은 3월 2일부터입니다.".into(),
            url: "https://example.com/1".into(),
            images: vec!["https://example.com/a.png".into()],
            attachments: vec![
                Attachment::new("a.pdf", "https://example.com/a.pdf"),
                Attachment {
                    size_bytes: Some(10),
                    etag: Some("\"e1\"".into()),
                    ..Attachment::new("b.hwp", "https://example.com/b.hwp")
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = fingerprint(&post());
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_attachment_order_does_not_matter() {
        let a = post();
        let mut b = post();
        b.attachments.reverse();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_image_order_does_not_matter() {
        let mut a = post();
        a.images.push("https://example.com/b.png".into());
        let mut b = a.clone();
        b.images.reverse();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_each_field_contributes() {
        let base = fingerprint(&post());

        let mut p = post();
        p.title.push('!');
        assert_ne!(fingerprint(&p), base);

        let mut p = post();
        p.body.push(' ');
        assert_ne!(fingerprint(&p), base);

        let mut p = post();
        p.attachments[0].size_bytes = Some(1);
        assert_ne!(fingerprint(&p), base);

        let mut p = post();
        p.attachments[1].etag = None;
        assert_ne!(fingerprint(&p), base);
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let mut a = post();
        a.title = "ab".into();
        a.body = "c".into();
        let mut b = post();
        b.title = "a".into();
        b.body = "bc".into();
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_analysis_fields_are_ignored() {
        let mut p = post();
        p.category = Some("장학".into());
        p.tags = vec!["x".into()];
        assert_eq!(fingerprint(&p), fingerprint(&post()));
    }
}
