use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};
use url::Url;

use crate::record::{Group, ModRecord, ModType, VersionFamily};

/// Folder below `{root}/{gameVersion}` an artifact of this kind lands in.
/// Empty means the version folder itself.
pub fn type_subfolder(mod_type: ModType, group: Group) -> &'static str {
    match mod_type {
        ModType::Shaderpack => "shaderpacks",
        ModType::Datapack => "datapacks",
        ModType::Installer => "installer",
        ModType::Modpack => "modpacks",
        ModType::Launcher | ModType::Server | ModType::Jdk => "",
        ModType::Mod if group == Group::Block => "mods/block",
        ModType::Mod => "mods",
    }
}

/// True when `name` is one path component that cannot leave the folder it is
/// joined to: not empty, not `.` or `..`, no separators, no drive prefix.
pub fn is_plain_segment(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', ':', '\0'])
}

/// Last path segment of `url`, percent-decoded. `None` for URLs without one.
pub fn filename_from_url(url: &str) -> Option<String> {
    let segment = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(str::to_string),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .map(str::to_string),
    }?;

    let decoded = percent_decode_str(&segment).decode_utf8_lossy().into_owned();
    let decoded = decoded.trim();
    is_plain_segment(decoded).then(|| decoded.to_string())
}

/// Picks the destination filename.
///
/// The `Jar` column only describes the current version, so other families
/// ignore it, and a value that is not a plain filename is passed over. After
/// that the URL's last segment is used, then `{ID}-{version}.jar`.
pub fn select_filename(
    record: &ModRecord,
    family: VersionFamily,
    url: &str,
    version: &str,
) -> String {
    let jar = record.jar.trim();
    if family == VersionFamily::Current && is_plain_segment(jar) {
        return jar.to_string();
    }
    if let Some(name) = filename_from_url(url) {
        return name;
    }
    let id = record.id.replace(['/', '\\', ':'], "-");
    if version.is_empty() {
        format!("{id}.jar")
    } else {
        format!("{id}-{version}.jar")
    }
}

/// `{root}/{gameVersion}/{typeSubfolder}/{filename}`.
///
/// `None` when the game version or filename would escape that folder.
pub fn destination(
    root: &Path,
    game_version: &str,
    mod_type: ModType,
    group: Group,
    filename: &str,
) -> Option<PathBuf> {
    if !is_plain_segment(game_version) || !is_plain_segment(filename) {
        return None;
    }
    let mut path = root.join(game_version);
    let subfolder = type_subfolder(mod_type, group);
    if !subfolder.is_empty() {
        path.push(subfolder);
    }
    Some(path.join(filename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Host;

    #[test]
    fn maps_types_to_subfolders() {
        assert_eq!(type_subfolder(ModType::Shaderpack, Group::Required), "shaderpacks");
        assert_eq!(type_subfolder(ModType::Datapack, Group::Optional), "datapacks");
        assert_eq!(type_subfolder(ModType::Installer, Group::Admin), "installer");
        assert_eq!(type_subfolder(ModType::Modpack, Group::Required), "modpacks");
        assert_eq!(type_subfolder(ModType::Launcher, Group::Required), "");
        assert_eq!(type_subfolder(ModType::Server, Group::Required), "");
        assert_eq!(type_subfolder(ModType::Mod, Group::Admin), "mods");
        assert_eq!(type_subfolder(ModType::Mod, Group::Block), "mods/block");
    }

    #[test]
    fn decodes_url_filenames() {
        assert_eq!(
            filename_from_url("https://cdn.modrinth.com/data/x/versions/y/Sodium%20Extra%200.6.jar?dl=1")
                .as_deref(),
            Some("Sodium Extra 0.6.jar")
        );
        assert_eq!(filename_from_url("https://x/a.jar").as_deref(), Some("a.jar"));
        assert_eq!(filename_from_url("https://x/"), None);
        assert_eq!(filename_from_url("https://x/%2F"), None);
    }

    #[test]
    fn filename_selection_order() {
        let mut record = ModRecord::new("acme/widget", Host::GitHub);
        record.jar = "widget-pinned.jar".to_string();

        assert_eq!(
            select_filename(&record, VersionFamily::Current, "https://x/a.jar", "1.0"),
            "widget-pinned.jar"
        );
        assert_eq!(
            select_filename(&record, VersionFamily::Latest, "https://x/a.jar", "1.0"),
            "a.jar"
        );
        assert_eq!(
            select_filename(&record, VersionFamily::Latest, "", "2.0"),
            "acme-widget-2.0.jar"
        );
    }

    #[test]
    fn builds_destination_paths() {
        let root = Path::new("/packs");
        assert_eq!(
            destination(root, "1.21.5", ModType::Mod, Group::Block, "x.jar"),
            Some(PathBuf::from("/packs/1.21.5/mods/block/x.jar"))
        );
        assert_eq!(
            destination(root, "1.21.5", ModType::Server, Group::Admin, "server.jar"),
            Some(PathBuf::from("/packs/1.21.5/server.jar"))
        );
    }

    #[test]
    fn refuses_paths_outside_the_version_folder() {
        let root = Path::new("/packs");
        assert_eq!(destination(root, "1.21.5", ModType::Mod, Group::Required, "/tmp/evil.jar"), None);
        assert_eq!(destination(root, "1.21.5", ModType::Mod, Group::Required, "../evil.jar"), None);
        assert_eq!(destination(root, "..", ModType::Server, Group::Required, "server.jar"), None);
        assert_eq!(destination(root, "/etc", ModType::Server, Group::Required, "server.jar"), None);
        assert_eq!(destination(root, "", ModType::Mod, Group::Required, "x.jar"), None);
    }

    #[test]
    fn unsafe_jar_column_falls_through_to_the_url() {
        let mut record = ModRecord::new("widget", Host::Direct);
        for jar in ["/tmp/outside/evil.jar", "../evil.jar", "mods\\evil.jar", ".."] {
            record.jar = jar.to_string();
            assert_eq!(
                select_filename(&record, VersionFamily::Current, "https://x/widget-1.0.jar", "1.0"),
                "widget-1.0.jar",
                "jar {jar}"
            );
        }
    }
}
