use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// Errors raised while building or editing a [`ModRecord`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("invalid value '{value}' for column {column}")]
    InvalidField { column: &'static str, value: String },
    #[error("cannot derive a mod identity from '{0}'")]
    UnrecognisedUrl(String),
}

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $column:literal {
            $($variant:ident => $text:literal $(| $alias:literal)*),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub enum $name {
            #[default]
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = RecordError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text $(| $alias)* => Ok($name::$variant),)+
                    _ => Err(RecordError::InvalidField {
                        column: $column,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum! {
    /// Where a record's artifacts come from.
    Host, "Host" {
        Direct => "direct" | "",
        Modrinth => "modrinth",
        CurseForge => "curseforge",
        GitHub => "github",
    }
}

string_enum! {
    /// Kind of artifact a record manages.
    ModType, "Type" {
        Mod => "mod" | "",
        Datapack => "datapack",
        Shaderpack => "shaderpack",
        Modpack => "modpack",
        Installer => "installer",
        Launcher => "launcher",
        Server => "server",
        Jdk => "jdk",
    }
}

string_enum! {
    /// Operator-assigned bucket, used by the path policy.
    Group, "Group" {
        Required => "required" | "",
        Optional => "optional",
        Admin => "admin",
        Block => "block",
    }
}

string_enum! {
    /// Client/server side support declared by a registry.
    SideSupport, "ClientSide/ServerSide" {
        Unspecified => "",
        Required => "required",
        Optional => "optional",
        Unsupported => "unsupported",
    }
}

impl ModType {
    /// Installers, launchers, server jars and JDKs: versioned per row, fetched by direct URL.
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            ModType::Installer | ModType::Launcher | ModType::Server | ModType::Jdk
        )
    }
}

/// Which of the three version slots an operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VersionFamily {
    #[default]
    Current,
    Next,
    Latest,
}

impl VersionFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionFamily::Current => "current",
            VersionFamily::Next => "next",
            VersionFamily::Latest => "latest",
        }
    }
}

impl fmt::Display for VersionFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `*Version` / `*VersionUrl` / `*GameVersion` triple.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionSlot {
    pub version: String,
    pub url: String,
    pub game_version: String,
}

impl VersionSlot {
    /// True when neither a version nor a URL is set.
    pub fn is_empty(&self) -> bool {
        self.version.is_empty() && self.url.is_empty()
    }
}

/// Required / optional foreign IDs for one version slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyIds {
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

/// Column order of the canonical schema.
pub const COLUMNS: &[&str] = &[
    "Group",
    "Type",
    "Name",
    "ID",
    "Host",
    "Loader",
    "ClientSide",
    "ServerSide",
    "Title",
    "ProjectUrl",
    "CurrentVersion",
    "CurrentVersionUrl",
    "CurrentGameVersion",
    "NextVersion",
    "NextVersionUrl",
    "NextGameVersion",
    "LatestVersion",
    "LatestVersionUrl",
    "LatestGameVersion",
    "CurrentDependenciesRequired",
    "CurrentDependenciesOptional",
    "LatestDependenciesRequired",
    "LatestDependenciesOptional",
    "Jar",
    "Url",
    "UrlDirect",
    "RecordHash",
];

const HASH_COLUMN: &str = "RecordHash";
const LEGACY_HOST_COLUMN: &str = "ApiSource";

/// One managed artifact. Every column is always present; empty means unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModRecord {
    pub group: Group,
    pub mod_type: ModType,
    pub name: String,
    /// Slug, numeric ID or `owner/repo`, depending on `host`.
    pub id: String,
    pub host: Host,
    pub loader: String,
    pub client_side: SideSupport,
    pub server_side: SideSupport,
    pub title: String,
    pub project_url: String,
    pub current: VersionSlot,
    pub next: VersionSlot,
    pub latest: VersionSlot,
    pub current_dependencies: DependencyIds,
    pub latest_dependencies: DependencyIds,
    /// Expected filename of the current artifact.
    pub jar: String,
    /// Fallback URL (usually the project page).
    pub url: String,
    /// Direct download URL, required for system records.
    pub url_direct: String,
    pub record_hash: String,
    /// Columns this schema does not know, kept verbatim for round-trips.
    pub extra: BTreeMap<String, String>,
    /// Cell text of normalised columns as read, written back while the parsed
    /// value is unchanged.
    source_text: BTreeMap<String, String>,
}

fn join_ids(ids: &[String]) -> String {
    ids.join(",")
}

fn split_ids(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Canonical text of a cell for columns that are parsed lossily: enum
/// columns lose case and empty-means-default, ID lists lose spacing.
/// `None` for columns stored verbatim or cells that do not parse.
fn canonical_text(column: &str, value: &str) -> Option<String> {
    let text = match column {
        "Group" => value.parse::<Group>().ok()?.as_str().to_string(),
        "Type" => value.parse::<ModType>().ok()?.as_str().to_string(),
        "Host" => value.parse::<Host>().ok()?.as_str().to_string(),
        "ClientSide" | "ServerSide" => value.parse::<SideSupport>().ok()?.as_str().to_string(),
        "CurrentDependenciesRequired"
        | "CurrentDependenciesOptional"
        | "LatestDependenciesRequired"
        | "LatestDependenciesOptional" => join_ids(&split_ids(value)),
        _ => return None,
    };
    Some(text)
}

impl ModRecord {
    /// Creates an empty record for a project.
    ///
    /// # Arguments
    ///
    /// * `id` - Registry slug, numeric ID or `owner/repo`. Also used as the name.
    /// * `host` - Registry the ID belongs to.
    ///
    /// # Returns
    ///
    /// A record with every other column empty and a fresh `RecordHash`.
    pub fn new<S: Into<String>>(id: S, host: Host) -> Self {
        let id = id.into();
        let mut record = Self {
            name: id.clone(),
            id,
            host,
            ..Self::default()
        };
        record.refresh_hash();
        record
    }

    /// Creates a record from a registry page or a direct download URL.
    ///
    /// # Errors
    ///
    /// Returns `RecordError::UnrecognisedUrl` when no identity can be derived.
    pub fn from_url(url: &str) -> Result<Self, RecordError> {
        let identity = identify_url(url)?;
        let mut record = Self {
            name: identity.name,
            id: identity.id,
            host: identity.host,
            mod_type: identity.mod_type,
            ..Self::default()
        };
        if identity.host == Host::Direct {
            record.url_direct = url.to_string();
        } else {
            record.url = url.to_string();
        }
        record.refresh_hash();
        Ok(record)
    }

    /// Name used in reports.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// The version triple of `family`.
    pub fn slot(&self, family: VersionFamily) -> &VersionSlot {
        match family {
            VersionFamily::Current => &self.current,
            VersionFamily::Next => &self.next,
            VersionFamily::Latest => &self.latest,
        }
    }

    pub fn slot_mut(&mut self, family: VersionFamily) -> &mut VersionSlot {
        match family {
            VersionFamily::Current => &mut self.current,
            VersionFamily::Next => &mut self.next,
            VersionFamily::Latest => &mut self.latest,
        }
    }

    /// Every dependency ID this record points at, across both buckets and slots.
    pub fn dependency_ids(&self) -> impl Iterator<Item = &str> {
        [&self.current_dependencies, &self.latest_dependencies]
            .into_iter()
            .flat_map(|deps| deps.required.iter().chain(deps.optional.iter()))
            .map(String::as_str)
    }

    /// Reads a column by its header name.
    ///
    /// Normalised columns return the text they were read with as long as it
    /// still parses to the current value.
    pub fn field(&self, column: &str) -> Option<String> {
        let value = self.canonical_field(column)?;
        match self.source_text.get(column) {
            Some(text) if canonical_text(column, text).as_deref() == Some(value.as_str()) => {
                Some(text.clone())
            }
            _ => Some(value),
        }
    }

    fn canonical_field(&self, column: &str) -> Option<String> {
        let value = match column {
            "Group" => self.group.as_str().to_string(),
            "Type" => self.mod_type.as_str().to_string(),
            "Name" => self.name.clone(),
            "ID" => self.id.clone(),
            "Host" => self.host.as_str().to_string(),
            "Loader" => self.loader.clone(),
            "ClientSide" => self.client_side.as_str().to_string(),
            "ServerSide" => self.server_side.as_str().to_string(),
            "Title" => self.title.clone(),
            "ProjectUrl" => self.project_url.clone(),
            "CurrentVersion" => self.current.version.clone(),
            "CurrentVersionUrl" => self.current.url.clone(),
            "CurrentGameVersion" => self.current.game_version.clone(),
            "NextVersion" => self.next.version.clone(),
            "NextVersionUrl" => self.next.url.clone(),
            "NextGameVersion" => self.next.game_version.clone(),
            "LatestVersion" => self.latest.version.clone(),
            "LatestVersionUrl" => self.latest.url.clone(),
            "LatestGameVersion" => self.latest.game_version.clone(),
            "CurrentDependenciesRequired" => join_ids(&self.current_dependencies.required),
            "CurrentDependenciesOptional" => join_ids(&self.current_dependencies.optional),
            "LatestDependenciesRequired" => join_ids(&self.latest_dependencies.required),
            "LatestDependenciesOptional" => join_ids(&self.latest_dependencies.optional),
            "Jar" => self.jar.clone(),
            "Url" => self.url.clone(),
            "UrlDirect" => self.url_direct.clone(),
            "RecordHash" => self.record_hash.clone(),
            other => return self.extra.get(other).cloned(),
        };
        Some(value)
    }

    /// Writes a column by its header name. Unknown columns land in `extra`.
    pub fn set_field(&mut self, column: &str, value: &str) -> Result<(), RecordError> {
        let owned = value.to_string();
        if canonical_text(column, value).is_some() {
            self.source_text.insert(column.to_string(), owned.clone());
        }
        match column {
            "Group" => self.group = value.parse()?,
            "Type" => self.mod_type = value.parse()?,
            "Name" => self.name = owned,
            "ID" => self.id = owned,
            "Host" => self.host = value.parse()?,
            "Loader" => self.loader = owned,
            "ClientSide" => self.client_side = value.parse()?,
            "ServerSide" => self.server_side = value.parse()?,
            "Title" => self.title = owned,
            "ProjectUrl" => self.project_url = owned,
            "CurrentVersion" => self.current.version = owned,
            "CurrentVersionUrl" => self.current.url = owned,
            "CurrentGameVersion" => self.current.game_version = owned,
            "NextVersion" => self.next.version = owned,
            "NextVersionUrl" => self.next.url = owned,
            "NextGameVersion" => self.next.game_version = owned,
            "LatestVersion" => self.latest.version = owned,
            "LatestVersionUrl" => self.latest.url = owned,
            "LatestGameVersion" => self.latest.game_version = owned,
            "CurrentDependenciesRequired" => self.current_dependencies.required = split_ids(value),
            "CurrentDependenciesOptional" => self.current_dependencies.optional = split_ids(value),
            "LatestDependenciesRequired" => self.latest_dependencies.required = split_ids(value),
            "LatestDependenciesOptional" => self.latest_dependencies.optional = split_ids(value),
            "Jar" => self.jar = owned,
            "Url" => self.url = owned,
            "UrlDirect" => self.url_direct = owned,
            "RecordHash" => self.record_hash = owned,
            other => {
                self.extra.insert(other.to_string(), owned);
            }
        }
        Ok(())
    }

    /// Builds a record from `(header, value)` pairs as read from the store.
    ///
    /// A legacy `ApiSource` column is kept as-is and also fills `Host` when
    /// that column is missing or empty.
    pub fn from_fields<'a, I>(fields: I) -> Result<Self, RecordError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut record = Self::default();
        let mut host_set = false;
        for (column, value) in fields {
            if column == "Host" && !value.trim().is_empty() {
                host_set = true;
            }
            record.set_field(column, value)?;
        }
        if !host_set {
            if let Some(source) = record.extra.get(LEGACY_HOST_COLUMN) {
                record.host = source.parse()?;
            }
        }
        Ok(record)
    }

    /// Content hash over every column except `RecordHash` itself.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for column in COLUMNS.iter().filter(|c| **c != HASH_COLUMN) {
            let value = self.field(column).unwrap_or_default();
            hasher.update(column.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        for (column, value) in &self.extra {
            hasher.update(column.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// Recomputes `RecordHash`. Call after every mutation.
    pub fn refresh_hash(&mut self) {
        self.record_hash = self.compute_hash();
    }

    /// True when the stored hash no longer matches the content, i.e. the row
    /// was edited outside this tool. Rows without a hash are not flagged.
    pub fn has_external_edits(&self) -> bool {
        !self.record_hash.is_empty() && self.record_hash != self.compute_hash()
    }
}

/// Identity derived from a URL by [`identify_url`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub host: Host,
    pub id: String,
    pub name: String,
    pub mod_type: ModType,
}

/// Derives host, ID and type from a Modrinth, CurseForge or GitHub URL.
///
/// Any other http(s) URL is treated as a direct download whose ID is the
/// file stem.
pub fn identify_url(raw: &str) -> Result<Identity, RecordError> {
    let unrecognised = || RecordError::UnrecognisedUrl(raw.to_string());
    let url = Url::parse(raw.trim()).map_err(|_| unrecognised())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(unrecognised());
    }
    let host = url.host_str().ok_or_else(unrecognised)?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let registry = |host: Host, id: &str, mod_type: ModType| Identity {
        host,
        id: id.to_string(),
        name: id.rsplit('/').next().unwrap_or(id).to_string(),
        mod_type,
    };

    match host.as_str() {
        "modrinth.com" => {
            let (kind, slug) = match segments.as_slice() {
                [kind, slug, ..] => (*kind, *slug),
                _ => return Err(unrecognised()),
            };
            let mod_type = match kind {
                "mod" | "plugin" => ModType::Mod,
                "datapack" => ModType::Datapack,
                "shader" => ModType::Shaderpack,
                "modpack" => ModType::Modpack,
                _ => return Err(unrecognised()),
            };
            Ok(registry(Host::Modrinth, slug, mod_type))
        }
        "curseforge.com" => {
            let (kind, slug) = match segments.as_slice() {
                ["minecraft", kind, slug, ..] => (*kind, *slug),
                _ => return Err(unrecognised()),
            };
            let mod_type = match kind {
                "mc-mods" => ModType::Mod,
                "shaders" => ModType::Shaderpack,
                "data-packs" => ModType::Datapack,
                "modpacks" => ModType::Modpack,
                _ => return Err(unrecognised()),
            };
            Ok(registry(Host::CurseForge, slug, mod_type))
        }
        "github.com" => match segments.as_slice() {
            [owner, repo, ..] => {
                let repo = repo.trim_end_matches(".git");
                Ok(registry(Host::GitHub, &format!("{owner}/{repo}"), ModType::Mod))
            }
            _ => Err(unrecognised()),
        },
        _ => {
            let file = segments.last().ok_or_else(unrecognised)?;
            let stem = file.rsplit_once('.').map(|(s, _)| s).unwrap_or(file);
            Ok(Identity {
                host: Host::Direct,
                id: stem.to_string(),
                name: stem.to_string(),
                mod_type: ModType::Mod,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_enums_case_insensitively() {
        assert_eq!("CurseForge".parse::<Host>().unwrap(), Host::CurseForge);
        assert_eq!("".parse::<Host>().unwrap(), Host::Direct);
        assert_eq!("ShaderPack".parse::<ModType>().unwrap(), ModType::Shaderpack);
        assert_eq!("block".parse::<Group>().unwrap(), Group::Block);
        assert_eq!("".parse::<SideSupport>().unwrap(), SideSupport::Unspecified);
        assert!(matches!(
            "nexus".parse::<Host>(),
            Err(RecordError::InvalidField { column: "Host", .. })
        ));
    }

    #[test]
    fn system_types_are_flagged() {
        assert!(ModType::Server.is_system());
        assert!(ModType::Jdk.is_system());
        assert!(!ModType::Datapack.is_system());
    }

    #[test]
    fn fields_round_trip_through_columns() {
        let mut record = ModRecord::new("sodium", Host::Modrinth);
        record.set_field("LatestVersion", "0.6.0").unwrap();
        record
            .set_field("CurrentDependenciesRequired", "fabric-api, ,cloth-config")
            .unwrap();
        record.set_field("Notes", "keep me").unwrap();

        assert_eq!(record.latest.version, "0.6.0");
        assert_eq!(
            record.current_dependencies.required,
            vec!["fabric-api", "cloth-config"]
        );
        assert_eq!(
            record.field("CurrentDependenciesRequired").unwrap(),
            "fabric-api, ,cloth-config"
        );
        record.current_dependencies.required.push("sodium".to_string());
        assert_eq!(
            record.field("CurrentDependenciesRequired").unwrap(),
            "fabric-api,cloth-config,sodium"
        );
        assert_eq!(record.field("Notes").unwrap(), "keep me");
        assert_eq!(record.field("Unknown"), None);
    }

    #[test]
    fn enum_columns_keep_their_cell_text_until_changed() {
        let mut record = ModRecord::from_fields([
            ("Host", "CurseForge"),
            ("Type", "Mod"),
            ("Group", ""),
            ("ClientSide", "Required"),
        ])
        .unwrap();
        assert_eq!(record.host, Host::CurseForge);
        assert_eq!(record.group, Group::Required);
        assert_eq!(record.field("Host").unwrap(), "CurseForge");
        assert_eq!(record.field("Type").unwrap(), "Mod");
        assert_eq!(record.field("Group").unwrap(), "");
        assert_eq!(record.field("ClientSide").unwrap(), "Required");

        record.mod_type = ModType::Server;
        record.group = Group::Block;
        assert_eq!(record.field("Type").unwrap(), "server");
        assert_eq!(record.field("Group").unwrap(), "block");
        assert_eq!(record.field("Host").unwrap(), "CurseForge");
    }

    #[test]
    fn legacy_api_source_fills_host() {
        let record = ModRecord::from_fields([("ID", "jei"), ("ApiSource", "curseforge")]).unwrap();
        assert_eq!(record.host, Host::CurseForge);
        assert_eq!(record.extra.get("ApiSource").unwrap(), "curseforge");

        let explicit =
            ModRecord::from_fields([("Host", "modrinth"), ("ApiSource", "curseforge")]).unwrap();
        assert_eq!(explicit.host, Host::Modrinth);
    }

    #[test]
    fn hash_tracks_content_and_detects_external_edits() {
        let mut record = ModRecord::new("lithium", Host::Modrinth);
        assert!(!record.has_external_edits());

        let before = record.record_hash.clone();
        record.loader = "fabric".to_string();
        assert!(record.has_external_edits());

        record.refresh_hash();
        assert_ne!(record.record_hash, before);
        assert!(!record.has_external_edits());

        record.record_hash.clear();
        assert!(!record.has_external_edits());
    }

    #[test]
    fn identifies_registry_urls() {
        let modrinth = identify_url("https://modrinth.com/shader/complementary-reimagined").unwrap();
        assert_eq!(modrinth.host, Host::Modrinth);
        assert_eq!(modrinth.id, "complementary-reimagined");
        assert_eq!(modrinth.mod_type, ModType::Shaderpack);

        let curse =
            identify_url("https://www.curseforge.com/minecraft/mc-mods/jei/files").unwrap();
        assert_eq!(curse.host, Host::CurseForge);
        assert_eq!(curse.id, "jei");

        let github = identify_url("https://github.com/CaffeineMC/sodium.git").unwrap();
        assert_eq!(github.host, Host::GitHub);
        assert_eq!(github.id, "CaffeineMC/sodium");
        assert_eq!(github.name, "sodium");
    }

    #[test]
    fn unknown_hosts_become_direct_records() {
        let record = ModRecord::from_url("https://example.org/files/server-tools-1.2.jar").unwrap();
        assert_eq!(record.host, Host::Direct);
        assert_eq!(record.id, "server-tools-1.2");
        assert_eq!(record.url_direct, "https://example.org/files/server-tools-1.2.jar");
        assert!(!record.record_hash.is_empty());
    }

    #[test]
    fn rejects_unusable_urls() {
        assert!(identify_url("not a url").is_err());
        assert!(identify_url("ftp://modrinth.com/mod/x").is_err());
        assert!(identify_url("https://modrinth.com/user/someone").is_err());
        assert!(identify_url("https://example.org/").is_err());
    }
}
