use encoding_rs::Encoding;
use html5ever::serialize::{serialize, SerializeOpts};
use markup5ever_rcdom::SerializableHandle;

use super::dom::LiveDocument;

/// 序列化文档
///
/// `document_encoding` 非空且可识别时按该编码输出，否则输出 UTF-8。
pub fn serialize_document(doc: &LiveDocument, document_encoding: &str) -> std::io::Result<Vec<u8>> {
    let mut buf: Vec<u8> = Vec::new();

    let serializable: SerializableHandle = doc.document().clone().into();
    serialize(&mut buf, &serializable, SerializeOpts::default())?;

    if !document_encoding.is_empty() {
        if let Some(encoding) = Encoding::for_label(document_encoding.as_bytes()) {
            let s: &str = &String::from_utf8_lossy(&buf);
            let (data, _, _) = encoding.encode(s);
            buf = data.to_vec();
        }
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_round_trip_keeps_text() {
        let doc = LiveDocument::parse("<html><body><p>Sign in</p></body></html>").unwrap();
        let out = serialize_document(&doc, "utf-8").unwrap();
        let html = String::from_utf8(out).unwrap();
        assert!(html.contains("<p>Sign in</p>"));
    }
}
