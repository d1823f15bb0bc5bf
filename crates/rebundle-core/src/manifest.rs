//! Package manifest and block map editing
//!
//! Package manifests are edited textually so that everything except the
//! attribute being replaced stays byte-for-byte identical.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Block size used by package block maps
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Size of a zip local file header without name or extra field
const LOCAL_HEADER_SIZE: usize = 30;

/// Overwrite the `Publisher` attribute of the manifest's `Identity` element
///
/// Returns false, leaving `manifest` untouched, unless exactly one
/// `Identity` element with a `Publisher` attribute is present.
pub fn patch_publisher(manifest: &mut String, publisher: &str) -> bool {
    let Ok(identity) = Regex::new(r"<(?:[A-Za-z_][\w.-]*:)?Identity\b[^>]*>") else {
        return false;
    };
    let (start, end) = {
        let mut elements = identity.find_iter(manifest.as_str());
        match (elements.next(), elements.next()) {
            (Some(element), None) => (element.start(), element.end()),
            _ => return false,
        }
    };

    let Ok(attribute) = Regex::new(r#"(\sPublisher\s*=\s*)(?:"[^"]*"|'[^']*')"#) else {
        return false;
    };
    let (range, replacement) = {
        let Some(caps) = attribute.captures(&manifest[start..end]) else {
            return false;
        };
        let (Some(whole), Some(prefix)) = (caps.get(0), caps.get(1)) else {
            return false;
        };
        (
            start + whole.start()..start + whole.end(),
            format!("{}\"{}\"", prefix.as_str(), xml_escape(publisher)),
        )
    };
    manifest.replace_range(range, &replacement);
    true
}

/// Read an attribute of the first matching element
pub fn extract_xml_attr(xml: &str, element: &str, attr: &str) -> Option<String> {
    let pattern = format!(
        r#"<(?:[A-Za-z_][\w.-]*:)?{}\s+[^>]*\b{}\s*=\s*"([^"]*)""#,
        regex::escape(element),
        regex::escape(attr)
    );
    Regex::new(&pattern)
        .ok()
        .and_then(|re| re.captures(xml))
        .and_then(|caps| caps.get(1))
        .map(|m| xml_unescape(m.as_str()))
}

/// Replace the block map entry for `file_name` with hashes of `content`
///
/// The new content is described as stored (uncompressed). Returns false when
/// the block map has no entry for the file.
pub fn update_block_map(block_map: &mut String, file_name: &str, content: &[u8]) -> bool {
    let pattern = format!(
        r#"(?s)<File\s[^>]*\bName="{}"[^>]*?(?:/>|>.*?</File>)"#,
        regex::escape(file_name)
    );
    let Ok(re) = Regex::new(&pattern) else {
        return false;
    };
    let Some(found) = re.find(block_map.as_str()) else {
        return false;
    };
    let range = found.range();

    let hash_method = extract_xml_attr(block_map, "BlockMap", "HashMethod").unwrap_or_default();
    let mut element = format!(
        r#"<File Name="{}" Size="{}" LfhSize="{}">"#,
        file_name,
        content.len(),
        LOCAL_HEADER_SIZE + file_name.len()
    );
    for block in content.chunks(BLOCK_SIZE) {
        element.push_str(&format!(r#"<Block Hash="{}"/>"#, block_hash(&hash_method, block)));
    }
    element.push_str("</File>");

    block_map.replace_range(range, &element);
    true
}

/// Drop the content type override for a part
pub fn remove_content_type_override(content_types: &mut String, part_name: &str) -> bool {
    let pattern = format!(
        r#"<Override\s[^>]*\bPartName="{}"[^>]*/>"#,
        regex::escape(part_name)
    );
    let Ok(re) = Regex::new(&pattern) else {
        return false;
    };
    let Some(range) = re.find(content_types.as_str()).map(|m| m.range()) else {
        return false;
    };
    content_types.replace_range(range, "");
    true
}

fn block_hash(hash_method: &str, block: &[u8]) -> String {
    if hash_method.ends_with("sha512") {
        STANDARD.encode(Sha512::digest(block))
    } else if hash_method.ends_with("sha384") {
        STANDARD.encode(Sha384::digest(block))
    } else {
        STANDARD.encode(Sha256::digest(block))
    }
}

fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Package xmlns="http://schemas.microsoft.com/appx/manifest/foundation/windows10">
  <Identity Name="Contoso.App" Publisher="CN=Old Publisher" Version="1.2.3.0" ProcessorArchitecture="x64" />
  <Properties><DisplayName>Contoso</DisplayName></Properties>
</Package>"#;

    #[test]
    fn test_patch_publisher() {
        let mut manifest = MANIFEST.to_string();
        assert!(patch_publisher(&mut manifest, "CN=New, O=\"Contoso & Co\""));

        assert_eq!(
            extract_xml_attr(&manifest, "Identity", "Publisher").as_deref(),
            Some("CN=New, O=\"Contoso & Co\"")
        );
        assert!(manifest.contains("O=&quot;Contoso &amp; Co&quot;"));
        assert!(manifest.contains(r#"Name="Contoso.App""#));
        assert!(manifest.contains(r#"Version="1.2.3.0""#));
        assert!(manifest.contains("<DisplayName>Contoso</DisplayName>"));
    }

    #[test]
    fn test_patch_prefixed_identity() {
        let mut manifest =
            r#"<p:Package><p:Identity Publisher='CN=A' Name="X"/></p:Package>"#.to_string();
        assert!(patch_publisher(&mut manifest, "CN=B"));
        assert_eq!(
            manifest,
            r#"<p:Package><p:Identity Publisher="CN=B" Name="X"/></p:Package>"#
        );
    }

    #[test]
    fn test_patch_requires_exactly_one_identity() {
        let mut none = "<Package><Properties/></Package>".to_string();
        assert!(!patch_publisher(&mut none, "CN=B"));

        let original =
            r#"<Package><Identity Publisher="CN=A"/><Identity Publisher="CN=C"/></Package>"#;
        let mut two = original.to_string();
        assert!(!patch_publisher(&mut two, "CN=B"));
        assert_eq!(two, original);

        let mut no_publisher = r#"<Package><Identity Name="X"/></Package>"#.to_string();
        assert!(!patch_publisher(&mut no_publisher, "CN=B"));
    }

    #[test]
    fn test_identity_name_is_not_a_prefix_match() {
        let mut manifest =
            r#"<Package><IdentityRef Publisher="CN=R"/><Identity Publisher="CN=A"/></Package>"#
                .to_string();
        assert!(patch_publisher(&mut manifest, "CN=B"));
        assert!(manifest.contains(r#"<IdentityRef Publisher="CN=R"/>"#));
        assert!(manifest.contains(r#"<Identity Publisher="CN=B"/>"#));
    }

    #[test]
    fn test_update_block_map() {
        let mut block_map = r#"<BlockMap xmlns="http://schemas.microsoft.com/appx/2010/blockmap" HashMethod="http://www.w3.org/2001/04/xmlenc#sha256"><File Name="App.exe" Size="3" LfhSize="37"><Block Hash="abc"/></File><File Name="AppxManifest.xml" Size="10" LfhSize="46"><Block Hash="old" Size="8"/></File></BlockMap>"#.to_string();

        let content = vec![b'x'; BLOCK_SIZE + 1];
        assert!(update_block_map(&mut block_map, "AppxManifest.xml", &content));

        let expected_first = STANDARD.encode(Sha256::digest(&content[..BLOCK_SIZE]));
        let expected_second = STANDARD.encode(Sha256::digest(&content[BLOCK_SIZE..]));
        assert!(block_map.contains(&format!(
            r#"<File Name="AppxManifest.xml" Size="{}" LfhSize="46"><Block Hash="{}"/><Block Hash="{}"/></File>"#,
            BLOCK_SIZE + 1,
            expected_first,
            expected_second
        )));
        assert!(block_map.contains(r#"<File Name="App.exe" Size="3" LfhSize="37"><Block Hash="abc"/></File>"#));
        assert!(!block_map.contains(r#"Hash="old""#));
    }

    #[test]
    fn test_update_block_map_missing_entry() {
        let mut block_map = r#"<BlockMap HashMethod="sha256"></BlockMap>"#.to_string();
        assert!(!update_block_map(&mut block_map, "AppxManifest.xml", b"content"));
    }

    #[test]
    fn test_remove_content_type_override() {
        let mut types = r#"<Types><Default Extension="xml" ContentType="application/vnd.ms-appx.manifest+xml"/><Override PartName="/AppxSignature.p7x" ContentType="application/vnd.ms-appx.signature"/></Types>"#.to_string();
        assert!(remove_content_type_override(&mut types, "/AppxSignature.p7x"));
        assert!(!types.contains("AppxSignature"));
        assert!(types.contains("<Default Extension=\"xml\""));
        assert!(!remove_content_type_override(&mut types, "/AppxSignature.p7x"));
    }
}
