//! Canonical category taxonomy and site category mapping
//!
//! The canonical taxonomy follows the Newznab numbering scheme: main
//! categories are in thousands (1000, 2000, etc.) and subcategories add
//! tens (2010, 2020, etc.). Each site adapter registers a [`CategoryMap`]
//! that translates between its own category vocabulary and this taxonomy.

use serde::{Deserialize, Serialize};

/// A canonical category definition
#[derive(Debug, Clone)]
pub struct Category {
    pub id: i32,
    pub name: &'static str,
    pub parent_id: Option<i32>,
}

impl Category {
    pub const fn new(id: i32, name: &'static str, parent_id: Option<i32>) -> Self {
        Self {
            id,
            name,
            parent_id,
        }
    }

    /// Check if this is a parent category
    pub fn is_parent(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// The canonical category table (the Newznab numbering scheme)
pub static CATEGORIES: &[Category] = &[
    // Console (1000)
    Category::new(1000, "Console", None),
    Category::new(1010, "Console/NDS", Some(1000)),
    Category::new(1020, "Console/PSP", Some(1000)),
    Category::new(1030, "Console/Wii", Some(1000)),
    Category::new(1040, "Console/Xbox", Some(1000)),
    Category::new(1050, "Console/Xbox 360", Some(1000)),
    Category::new(1080, "Console/PS3", Some(1000)),
    Category::new(1090, "Console/Other", Some(1000)),
    Category::new(1110, "Console/3DS", Some(1000)),
    Category::new(1130, "Console/WiiU", Some(1000)),
    Category::new(1140, "Console/Xbox One", Some(1000)),
    Category::new(1150, "Console/PS4", Some(1000)),
    Category::new(1180, "Console/Switch", Some(1000)),
    // Movies (2000)
    Category::new(2000, "Movies", None),
    Category::new(2010, "Movies/Foreign", Some(2000)),
    Category::new(2020, "Movies/Other", Some(2000)),
    Category::new(2030, "Movies/SD", Some(2000)),
    Category::new(2040, "Movies/HD", Some(2000)),
    Category::new(2045, "Movies/UHD", Some(2000)),
    Category::new(2050, "Movies/BluRay", Some(2000)),
    Category::new(2060, "Movies/3D", Some(2000)),
    Category::new(2070, "Movies/DVD", Some(2000)),
    Category::new(2080, "Movies/WEB-DL", Some(2000)),
    // Audio (3000)
    Category::new(3000, "Audio", None),
    Category::new(3010, "Audio/MP3", Some(3000)),
    Category::new(3020, "Audio/Video", Some(3000)),
    Category::new(3030, "Audio/Audiobook", Some(3000)),
    Category::new(3040, "Audio/Lossless", Some(3000)),
    Category::new(3050, "Audio/Other", Some(3000)),
    Category::new(3060, "Audio/Foreign", Some(3000)),
    // PC (4000)
    Category::new(4000, "PC", None),
    Category::new(4010, "PC/0day", Some(4000)),
    Category::new(4020, "PC/ISO", Some(4000)),
    Category::new(4030, "PC/Mac", Some(4000)),
    Category::new(4040, "PC/Mobile-Other", Some(4000)),
    Category::new(4050, "PC/Games", Some(4000)),
    Category::new(4060, "PC/Mobile-iOS", Some(4000)),
    Category::new(4070, "PC/Mobile-Android", Some(4000)),
    // TV (5000)
    Category::new(5000, "TV", None),
    Category::new(5010, "TV/WEB-DL", Some(5000)),
    Category::new(5020, "TV/Foreign", Some(5000)),
    Category::new(5030, "TV/SD", Some(5000)),
    Category::new(5040, "TV/HD", Some(5000)),
    Category::new(5045, "TV/UHD", Some(5000)),
    Category::new(5050, "TV/Other", Some(5000)),
    Category::new(5060, "TV/Sport", Some(5000)),
    Category::new(5070, "TV/Anime", Some(5000)),
    Category::new(5080, "TV/Documentary", Some(5000)),
    // XXX (6000)
    Category::new(6000, "XXX", None),
    Category::new(6010, "XXX/DVD", Some(6000)),
    Category::new(6040, "XXX/x264", Some(6000)),
    Category::new(6050, "XXX/Pack", Some(6000)),
    Category::new(6060, "XXX/ImageSet", Some(6000)),
    Category::new(6070, "XXX/Other", Some(6000)),
    Category::new(6080, "XXX/SD", Some(6000)),
    Category::new(6090, "XXX/WEB-DL", Some(6000)),
    // Books (7000)
    Category::new(7000, "Books", None),
    Category::new(7010, "Books/Mags", Some(7000)),
    Category::new(7020, "Books/EBook", Some(7000)),
    Category::new(7030, "Books/Comics", Some(7000)),
    Category::new(7040, "Books/Technical", Some(7000)),
    Category::new(7050, "Books/Other", Some(7000)),
    Category::new(7060, "Books/Foreign", Some(7000)),
    // Other (8000)
    Category::new(8000, "Other", None),
    Category::new(8010, "Other/Misc", Some(8000)),
    Category::new(8020, "Other/Hashed", Some(8000)),
];

/// Common category constants for easy reference
pub mod cats {
    // Main categories
    pub const CONSOLE: i32 = 1000;
    pub const MOVIES: i32 = 2000;
    pub const AUDIO: i32 = 3000;
    pub const PC: i32 = 4000;
    pub const TV: i32 = 5000;
    pub const XXX: i32 = 6000;
    pub const BOOKS: i32 = 7000;
    pub const OTHER: i32 = 8000;

    // Movies subcategories
    pub const MOVIES_FOREIGN: i32 = 2010;
    pub const MOVIES_OTHER: i32 = 2020;
    pub const MOVIES_SD: i32 = 2030;
    pub const MOVIES_HD: i32 = 2040;
    pub const MOVIES_UHD: i32 = 2045;
    pub const MOVIES_BLURAY: i32 = 2050;
    pub const MOVIES_3D: i32 = 2060;
    pub const MOVIES_DVD: i32 = 2070;
    pub const MOVIES_WEBDL: i32 = 2080;

    // TV subcategories
    pub const TV_WEBDL: i32 = 5010;
    pub const TV_FOREIGN: i32 = 5020;
    pub const TV_SD: i32 = 5030;
    pub const TV_HD: i32 = 5040;
    pub const TV_UHD: i32 = 5045;
    pub const TV_OTHER: i32 = 5050;
    pub const TV_SPORT: i32 = 5060;
    pub const TV_ANIME: i32 = 5070;
    pub const TV_DOCUMENTARY: i32 = 5080;

    // Audio subcategories
    pub const AUDIO_MP3: i32 = 3010;
    pub const AUDIO_VIDEO: i32 = 3020;
    pub const AUDIO_AUDIOBOOK: i32 = 3030;
    pub const AUDIO_LOSSLESS: i32 = 3040;
    pub const AUDIO_OTHER: i32 = 3050;

    // Books subcategories
    pub const BOOKS_MAGS: i32 = 7010;
    pub const BOOKS_EBOOK: i32 = 7020;
    pub const BOOKS_COMICS: i32 = 7030;
    pub const BOOKS_OTHER: i32 = 7050;

    // PC subcategories
    pub const PC_0DAY: i32 = 4010;
    pub const PC_ISO: i32 = 4020;
    pub const PC_MAC: i32 = 4030;
    pub const PC_MOBILE_OTHER: i32 = 4040;
    pub const PC_GAMES: i32 = 4050;

    // Console subcategories
    pub const CONSOLE_WII: i32 = 1030;
    pub const CONSOLE_XBOX: i32 = 1040;
    pub const CONSOLE_PS4: i32 = 1150;
    pub const CONSOLE_SWITCH: i32 = 1180;
    pub const CONSOLE_OTHER: i32 = 1090;

    // Other subcategories
    pub const OTHER_MISC: i32 = 8010;
}

/// Get a canonical category by ID
pub fn category(id: i32) -> Option<&'static Category> {
    CATEGORIES.iter().find(|c| c.id == id)
}

/// Get all subcategories of a parent category
pub fn subcategories(parent_id: i32) -> Vec<&'static Category> {
    CATEGORIES
        .iter()
        .filter(|c| c.parent_id == Some(parent_id))
        .collect()
}

/// Get the parent category of a category
pub fn parent_of(id: i32) -> Option<&'static Category> {
    let cat = category(id)?;
    cat.parent_id.and_then(category)
}

/// Expand categories to include all subcategories, sorted and deduplicated
/// E.g., [2000] -> [2000, 2010, 2020, 2030, 2040, 2045, 2050, 2060, 2070, 2080]
pub fn expand(categories: &[i32]) -> Vec<i32> {
    let mut expanded = vec![];

    for &cat in categories {
        expanded.push(cat);

        for child in CATEGORIES {
            if child.parent_id == Some(cat) {
                expanded.push(child.id);
            }
        }
    }

    expanded.sort();
    expanded.dedup();
    expanded
}

/// One registered translation between a site category token and a canonical ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryMapping {
    /// The site's internal category token (string, since sites use anything)
    pub site_token: String,
    /// The canonical category ID it maps to
    pub canonical: i32,
    /// Description of the site category
    pub description: Option<String>,
}

impl CategoryMapping {
    pub fn new(site_token: impl Into<String>, canonical: i32, desc: impl Into<String>) -> Self {
        Self {
            site_token: site_token.into(),
            canonical,
            description: Some(desc.into()),
        }
    }
}

/// Bidirectional mapping between one site's category vocabulary and the
/// canonical taxonomy.
///
/// The mapping is many-to-many in both directions: a site token may map to
/// several canonical IDs and several tokens may map to the same canonical ID.
/// Built once at adapter construction and immutable afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryMap {
    mappings: Vec<CategoryMapping>,
}

impl CategoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_mappings(mappings: Vec<CategoryMapping>) -> Self {
        Self { mappings }
    }

    /// Register a site token against a canonical category
    pub fn add(&mut self, site_token: impl Into<String>, canonical: i32, desc: impl Into<String>) {
        self.mappings
            .push(CategoryMapping::new(site_token, canonical, desc));
    }

    pub fn mappings(&self) -> &[CategoryMapping] {
        &self.mappings
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Translate requested canonical categories into site tokens.
    ///
    /// A requested parent category matches tokens registered against any of
    /// its children. Tokens come back deduplicated in registration order.
    /// An empty request means "no category filter" and yields no tokens.
    pub fn to_site_tokens(&self, canonical: &[i32]) -> Vec<String> {
        if canonical.is_empty() {
            return vec![];
        }

        let wanted = expand(canonical);
        let mut tokens: Vec<String> = Vec::new();

        for mapping in &self.mappings {
            if wanted.binary_search(&mapping.canonical).is_ok()
                && !tokens.contains(&mapping.site_token)
            {
                tokens.push(mapping.site_token.clone());
            }
        }

        tokens
    }

    /// Translate a site token into every canonical ID it was registered
    /// against, deduplicated in registration order.
    ///
    /// An unregistered token lands in the catch-all Other bucket rather than
    /// disappearing, so releases from unmapped site categories stay visible.
    pub fn to_canonical(&self, site_token: &str) -> Vec<i32> {
        let mut ids: Vec<i32> = Vec::new();

        for mapping in &self.mappings {
            if mapping.site_token == site_token && !ids.contains(&mapping.canonical) {
                ids.push(mapping.canonical);
            }
        }

        if ids.is_empty() {
            ids.push(cats::OTHER);
        }

        ids
    }
}
