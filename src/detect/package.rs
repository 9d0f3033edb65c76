/// Bytes read from the start of a package for format sniffing.
pub const SNIFF_BYTES: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFormat {
    WindowsPe,
    Msi,
    Elf,
    MachO,
    Script,
    /// An HTML page, typically an error page served with HTTP 200.
    Html,
    Unknown,
}

impl PackageFormat {
    /// Formats that can never be a runnable installer.
    pub fn is_rejected(self) -> bool {
        matches!(self, Self::Html)
    }
}

/// Detect package format from header bytes (first few hundred bytes).
pub fn detect_package(header: &[u8]) -> PackageFormat {
    // PE: "MZ" DOS stub
    if header.len() >= 2 && &header[0..2] == b"MZ" {
        return PackageFormat::WindowsPe;
    }

    // MSI: OLE compound document
    if header.len() >= 8 && header[0..8] == [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1] {
        return PackageFormat::Msi;
    }

    if header.len() >= 4 && header[0..4] == [0x7F, b'E', b'L', b'F'] {
        return PackageFormat::Elf;
    }

    // Mach-O thin (both endiannesses, 32/64-bit) and fat binaries
    if header.len() >= 4 {
        let magic = [header[0], header[1], header[2], header[3]];
        match magic {
            [0xFE, 0xED, 0xFA, 0xCE]
            | [0xFE, 0xED, 0xFA, 0xCF]
            | [0xCE, 0xFA, 0xED, 0xFE]
            | [0xCF, 0xFA, 0xED, 0xFE]
            | [0xCA, 0xFE, 0xBA, 0xBE] => return PackageFormat::MachO,
            _ => {}
        }
    }

    if header.len() >= 2 && &header[0..2] == b"#!" {
        return PackageFormat::Script;
    }

    if looks_like_html(header) {
        return PackageFormat::Html;
    }

    PackageFormat::Unknown
}

fn looks_like_html(header: &[u8]) -> bool {
    let body = header.strip_prefix(&b"\xEF\xBB\xBF"[..]).unwrap_or(header);
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    let prefix: Vec<u8> = body[start..]
        .iter()
        .take(14)
        .map(u8::to_ascii_lowercase)
        .collect();
    prefix.starts_with(b"<!doctype html") || prefix.starts_with(b"<html")
}
