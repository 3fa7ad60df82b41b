use crate::error::FillError;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Logical name the first discovered system CJK font registers under.
pub const CJK_DISCOVERED: &str = "CJK-Discovered";
/// Logical name the built-in CID fallback registers under.
pub const CJK_BUILTIN: &str = "CJK-Builtin";

pub(crate) const BUILTIN_CID_FONT: &str = "STSong-Light";
pub(crate) const BASE_FONT: &str = "Helvetica";

/// Filename fragments that identify common CJK-capable fonts across
/// platforms (compared against a lowercased, separator-stripped stem).
const CJK_BASENAMES: &[&str] = &[
    "simsun",
    "simhei",
    "msyh",
    "song",
    "pingfang",
    "sourcehan",
    "notosanscjk",
    "notoserifcjk",
    "wqy",
];

const FONT_EXTENSIONS: &[&str] = &["ttf", "ttc", "otf"];
const SCAN_DEPTH: usize = 4;

/// A resolved font, ready for PDF emission.
///
/// The three variants mirror the fallback chain: a real font program to
/// embed, a standard CID font the viewer supplies (`STSong-Light` via
/// `UniGB-UCS2-H`), or a base-14 font where non-Latin text degrades to
/// replacement glyphs without failing.
#[derive(Debug, Clone)]
pub enum FontHandle {
    Embedded(Arc<EmbeddedFont>),
    BuiltinCid(&'static str),
    Base(&'static str),
}

/// Capability to turn an optional preferred font name into a usable
/// handle. Never fails; the worst outcome is a degraded base font.
pub trait FontSource: Send + Sync {
    fn resolve(&self, preferred: Option<&str>) -> FontHandle;
}

/// A parsed TTF/OTF program plus the metrics PDF font objects need.
#[derive(Debug)]
pub struct EmbeddedFont {
    pub name: String,
    pub(crate) data: Vec<u8>,
    pub(crate) metrics: FontMetrics,
    aliases: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct FontMetrics {
    pub(crate) ascent: i16,
    pub(crate) descent: i16,
    pub(crate) cap_height: i16,
    pub(crate) italic_angle: i16,
    pub(crate) bbox: (i16, i16, i16, i16),
    pub(crate) missing_width: u16,
    pub(crate) is_fixed_pitch: bool,
    pub(crate) symbolic: bool,
}

impl EmbeddedFont {
    pub(crate) fn from_bytes(data: Vec<u8>, source_name: &str) -> Result<Self, FillError> {
        let face = ttf_parser::Face::parse(&data, 0)
            .map_err(|_| FillError::Font(format!("invalid font data for {source_name}")))?;
        let (name, aliases) = font_names(&face, Path::new(source_name));
        let metrics = FontMetrics::from_face(&face);
        drop(face);
        Ok(Self {
            name,
            data,
            metrics,
            aliases,
        })
    }

    /// Direct codepoint-to-glyph mapping; 0 (notdef) when the face lacks
    /// the character.
    pub(crate) fn glyph_id(&self, ch: char) -> u16 {
        match ttf_parser::Face::parse(&self.data, 0) {
            Ok(face) => face.glyph_index(ch).map(|g| g.0).unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Horizontal advance for a glyph, scaled to a 1000-unit em.
    pub(crate) fn glyph_advance(&self, gid: u16) -> u16 {
        let Ok(face) = ttf_parser::Face::parse(&self.data, 0) else {
            return 0;
        };
        let advance = face.glyph_hor_advance(ttf_parser::GlyphId(gid)).unwrap_or(0);
        let units = face.units_per_em().max(1) as i64;
        let scaled = ((advance as i64) * 1000 + (units / 2)) / units;
        scaled.clamp(0, u16::MAX as i64) as u16
    }
}

impl FontMetrics {
    fn from_face(face: &ttf_parser::Face<'_>) -> Self {
        let units_per_em = face.units_per_em().max(1);
        let scale = 1000.0 / units_per_em as f32;

        let ascent = scale_i16(face.ascender(), scale);
        let descent = scale_i16(face.descender(), scale);
        let cap_height = face
            .capital_height()
            .map(|value| scale_i16(value, scale))
            .unwrap_or(ascent);
        let italic_angle = face
            .italic_angle()
            .map(|value| value.round() as i16)
            .unwrap_or(0);
        let bbox = face.global_bounding_box();
        let bbox = (
            scale_i16(bbox.x_min, scale),
            scale_i16(bbox.y_min, scale),
            scale_i16(bbox.x_max, scale),
            scale_i16(bbox.y_max, scale),
        );
        let missing_width = face
            .glyph_index(' ')
            .and_then(|gid| face.glyph_hor_advance(gid))
            .map(|advance| {
                let scaled = (advance as f32 * scale).round() as i32;
                scaled.clamp(0, u16::MAX as i32) as u16
            })
            .unwrap_or(0);

        let has_unicode_cmap = face
            .tables()
            .cmap
            .map(|cmap| cmap.subtables.into_iter().any(|s| s.is_unicode()))
            .unwrap_or(false);

        Self {
            ascent,
            descent,
            cap_height,
            italic_angle,
            bbox,
            missing_width,
            is_fixed_pitch: face.is_monospaced(),
            symbolic: !has_unicode_cmap,
        }
    }

    pub(crate) fn flags(&self) -> i64 {
        let mut flags = if self.symbolic { 4 } else { 32 };
        if self.is_fixed_pitch {
            flags |= 1;
        }
        flags
    }
}

struct RegistryState {
    by_name: HashMap<String, FontHandle>,
    scanned: bool,
    scan_count: usize,
}

/// The default [`FontSource`]: explicit registrations first, then a
/// one-time scan of well-known system font directories for a CJK face,
/// then the built-in CID font, then Helvetica.
pub struct SystemFonts {
    font_dirs: Vec<PathBuf>,
    use_builtin_cid: bool,
    state: Mutex<RegistryState>,
}

impl SystemFonts {
    pub fn new() -> Self {
        Self::with_font_dirs(default_font_dirs())
    }

    pub fn with_font_dirs(font_dirs: Vec<PathBuf>) -> Self {
        Self {
            font_dirs,
            use_builtin_cid: true,
            state: Mutex::new(RegistryState {
                by_name: HashMap::new(),
                scanned: false,
                scan_count: 0,
            }),
        }
    }

    /// Disable the built-in CID fallback, leaving Helvetica as the
    /// terminal step of the chain.
    pub fn builtin_cid(mut self, enabled: bool) -> Self {
        self.use_builtin_cid = enabled;
        self
    }

    /// Process-wide instance; font registration is global state, so
    /// resolution through this handle is shared by all fills.
    pub fn global() -> &'static SystemFonts {
        static GLOBAL: OnceLock<SystemFonts> = OnceLock::new();
        GLOBAL.get_or_init(SystemFonts::new)
    }

    /// Register a font program under its face names. Returns the primary
    /// name the font is now resolvable by.
    pub fn register_bytes(
        &self,
        data: Vec<u8>,
        source_name: Option<&str>,
    ) -> Result<String, FillError> {
        let font = EmbeddedFont::from_bytes(data, source_name.unwrap_or("EmbeddedFont"))?;
        let primary = font.name.clone();
        let aliases = font.aliases.clone();
        let handle = FontHandle::Embedded(Arc::new(font));

        let mut state = self.lock_state();
        for alias in std::iter::once(primary.as_str()).chain(aliases.iter().map(String::as_str)) {
            let key = normalize_name(alias);
            if key.is_empty() || state.by_name.contains_key(&key) {
                continue;
            }
            state.by_name.insert(key, handle.clone());
        }
        Ok(primary)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn scan_once(&self, state: &mut RegistryState) -> Option<FontHandle> {
        if state.scanned {
            return None;
        }
        state.scanned = true;
        state.scan_count += 1;

        let font = scan_font_dirs(&self.font_dirs)?;
        log::debug!("registered discovered CJK font: {}", font.name);
        let primary = font.name.clone();
        let aliases = font.aliases.clone();
        let handle = FontHandle::Embedded(Arc::new(font));
        for alias in std::iter::once(CJK_DISCOVERED)
            .chain(std::iter::once(primary.as_str()))
            .chain(aliases.iter().map(String::as_str))
        {
            let key = normalize_name(alias);
            if key.is_empty() || state.by_name.contains_key(&key) {
                continue;
            }
            state.by_name.insert(key, handle.clone());
        }
        Some(handle)
    }

    #[cfg(test)]
    fn scan_count(&self) -> usize {
        self.lock_state().scan_count
    }
}

impl Default for SystemFonts {
    fn default() -> Self {
        Self::new()
    }
}

impl FontSource for SystemFonts {
    fn resolve(&self, preferred: Option<&str>) -> FontHandle {
        let mut state = self.lock_state();

        if let Some(name) = preferred {
            if let Some(handle) = state.by_name.get(&normalize_name(name)) {
                return handle.clone();
            }
        }
        if let Some(handle) = state.by_name.get(&normalize_name(CJK_DISCOVERED)) {
            return handle.clone();
        }
        if let Some(handle) = self.scan_once(&mut state) {
            return handle;
        }
        if self.use_builtin_cid {
            let handle = FontHandle::BuiltinCid(BUILTIN_CID_FONT);
            state
                .by_name
                .entry(normalize_name(CJK_BUILTIN))
                .or_insert_with(|| handle.clone());
            return handle;
        }
        log::warn!("no CJK-capable font available, falling back to {BASE_FONT}");
        FontHandle::Base(BASE_FONT)
    }
}

#[cfg(target_os = "windows")]
fn default_font_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let windir = std::env::var_os("WINDIR").unwrap_or_else(|| "C:\\Windows".into());
    dirs.push(PathBuf::from(windir).join("Fonts"));
    if let Some(local) = std::env::var_os("LOCALAPPDATA") {
        dirs.push(PathBuf::from(local).join("Microsoft\\Windows\\Fonts"));
    }
    dirs
}

#[cfg(target_os = "macos")]
fn default_font_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/System/Library/Fonts"),
        PathBuf::from("/Library/Fonts"),
    ];
    if let Some(home) = std::env::var_os("HOME") {
        dirs.push(PathBuf::from(home).join("Library/Fonts"));
    }
    dirs
}

#[cfg(all(unix, not(target_os = "macos")))]
fn default_font_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/usr/share/fonts"),
        PathBuf::from("/usr/local/share/fonts"),
    ];
    if let Some(home) = std::env::var_os("HOME") {
        let home = PathBuf::from(home);
        dirs.push(home.join(".fonts"));
        dirs.push(home.join(".local/share/fonts"));
    }
    dirs
}

fn scan_font_dirs(dirs: &[PathBuf]) -> Option<EmbeddedFont> {
    for dir in dirs {
        if let Some(font) = scan_dir(dir, SCAN_DEPTH) {
            return Some(font);
        }
    }
    log::warn!("no CJK font found under {} font director(ies)", dirs.len());
    None
}

fn scan_dir(dir: &Path, depth: usize) -> Option<EmbeddedFont> {
    let entries = fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if depth > 0 {
                subdirs.push(path);
            }
            continue;
        }
        if !is_cjk_candidate(&path) {
            continue;
        }
        let Ok(data) = fs::read(&path) else {
            continue;
        };
        match EmbeddedFont::from_bytes(data, &path.to_string_lossy()) {
            Ok(font) => return Some(font),
            Err(_) => continue,
        }
    }
    subdirs.sort();
    for sub in subdirs {
        if let Some(font) = scan_dir(&sub, depth - 1) {
            return Some(font);
        }
    }
    None
}

fn is_cjk_candidate(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|v| v.to_str()) else {
        return false;
    };
    if !FONT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
        return false;
    }
    let Some(stem) = path.file_stem().and_then(|v| v.to_str()) else {
        return false;
    };
    let stem: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    CJK_BASENAMES.iter().any(|needle| stem.contains(needle))
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_ascii_lowercase()
}

fn font_names(face: &ttf_parser::Face<'_>, path: &Path) -> (String, Vec<String>) {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut full = None;
    let mut post = None;

    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        match entry.name_id {
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY => {
                if family.is_none() {
                    family = Some(name);
                }
            }
            name_id::FULL_NAME => {
                if full.is_none() {
                    full = Some(name);
                }
            }
            name_id::POST_SCRIPT_NAME => {
                if post.is_none() {
                    post = Some(name);
                }
            }
            _ => {}
        }
    }

    let stem = path
        .file_stem()
        .and_then(|v| v.to_str())
        .map(|v| v.to_string());
    let primary = post
        .clone()
        .or_else(|| full.clone())
        .or_else(|| family.clone())
        .or_else(|| stem.clone())
        .unwrap_or_else(|| "EmbeddedFont".to_string());

    let mut aliases = Vec::new();
    for candidate in [family, full, post, stem].into_iter().flatten() {
        if candidate != primary {
            aliases.push(candidate);
        }
    }

    (primary, aliases)
}

fn scale_i16(value: i16, scale: f32) -> i16 {
    let scaled = (value as f32 * scale).round() as i32;
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_dir_fonts() -> (tempfile::TempDir, SystemFonts) {
        let dir = tempfile::tempdir().expect("tempdir");
        let fonts = SystemFonts::with_font_dirs(vec![dir.path().to_path_buf()]);
        (dir, fonts)
    }

    #[test]
    fn chain_falls_back_to_builtin_cid_when_nothing_discovered() {
        let (_dir, fonts) = empty_dir_fonts();
        match fonts.resolve(None) {
            FontHandle::BuiltinCid(name) => assert_eq!(name, BUILTIN_CID_FONT),
            other => panic!("expected builtin CID fallback, got {other:?}"),
        }
    }

    #[test]
    fn chain_terminates_at_base_font_when_builtin_disabled() {
        let (_dir, fonts) = empty_dir_fonts();
        let fonts = fonts.builtin_cid(false);
        match fonts.resolve(Some("NoSuchFont")) {
            FontHandle::Base(name) => assert_eq!(name, BASE_FONT),
            other => panic!("expected base font, got {other:?}"),
        }
    }

    #[test]
    fn directory_discovery_runs_at_most_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A matching basename with garbage content: the scan must skip it
        // without error and must not re-scan on later resolutions.
        std::fs::write(dir.path().join("simsun.ttf"), b"not a font").expect("write");
        let fonts = SystemFonts::with_font_dirs(vec![dir.path().to_path_buf()]);
        fonts.resolve(None);
        fonts.resolve(None);
        fonts.resolve(Some("simsun"));
        assert_eq!(fonts.scan_count(), 1);
    }

    #[test]
    fn resolution_is_idempotent() {
        let (_dir, fonts) = empty_dir_fonts();
        let first = fonts.resolve(Some("SimSun"));
        let second = fonts.resolve(Some("SimSun"));
        assert!(matches!(
            (first, second),
            (FontHandle::BuiltinCid(a), FontHandle::BuiltinCid(b)) if a == b
        ));
    }

    #[test]
    fn register_bytes_rejects_invalid_font_data() {
        let (_dir, fonts) = empty_dir_fonts();
        let err = fonts
            .register_bytes(b"definitely not a font".to_vec(), Some("bad.ttf"))
            .expect_err("must fail");
        assert!(err.to_string().contains("invalid font data"));
    }

    #[test]
    fn cjk_candidate_matching_ignores_case_and_separators() {
        assert!(is_cjk_candidate(Path::new("/f/NotoSansCJK-Regular.ttc")));
        assert!(is_cjk_candidate(Path::new("/f/Source_Han_Sans.otf")));
        assert!(is_cjk_candidate(Path::new("/f/simsun.ttf")));
        assert!(!is_cjk_candidate(Path::new("/f/DejaVuSans.ttf")));
        assert!(!is_cjk_candidate(Path::new("/f/simsun.txt")));
    }

    #[test]
    fn normalize_name_strips_quotes_and_case() {
        assert_eq!(normalize_name(" \"SimSun\" "), "simsun");
        assert_eq!(normalize_name("'Noto Sans CJK'"), "noto sans cjk");
    }
}
