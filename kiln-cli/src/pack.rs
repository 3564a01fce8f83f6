//! Folder packing
//!
//! Zips a local folder in memory. Entry names are relative to the folder
//! root and always use forward slashes; symlinks are skipped.

use anyhow::{Context, Result, bail};
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

type Writer = ZipWriter<Cursor<Vec<u8>>>;

/// Packs `folder` into a zip archive on a blocking thread
pub async fn pack_folder(folder: &Path) -> Result<Vec<u8>> {
    let folder = folder.to_path_buf();
    tokio::task::spawn_blocking(move || pack_folder_blocking(&folder))
        .await
        .context("Packing task failed")?
}

fn pack_folder_blocking(folder: &Path) -> Result<Vec<u8>> {
    if !folder.is_dir() {
        bail!("{} is not a directory", folder.display());
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    add_dir(&mut writer, folder, folder, options)?;

    let cursor = writer.finish().context("Failed to finish archive")?;
    Ok(cursor.into_inner())
}

fn add_dir(writer: &mut Writer, root: &Path, dir: &Path, options: SimpleFileOptions) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type()?;
        let name = relative_name(root, &path)?;

        if file_type.is_dir() {
            writer.add_directory(format!("{}/", name), options)?;
            add_dir(writer, root, &path, options)?;
        } else if file_type.is_file() {
            let contents =
                fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
            writer.start_file(name, options)?;
            writer.write_all(&contents)?;
        }
    }

    Ok(())
}

fn relative_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root)?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    #[test]
    fn test_pack_keeps_relative_layout() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM python:3.11\n").unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src").join("main.py"), "print('hi')\n").unwrap();

        let bytes = pack_folder_blocking(dir.path()).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();

        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, vec!["Dockerfile", "src/", "src/main.py"]);

        let mut contents = String::new();
        archive
            .by_name("src/main.py")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "print('hi')\n");
    }

    #[test]
    fn test_pack_rejects_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Dockerfile");
        fs::write(&file, "FROM scratch\n").unwrap();

        assert!(pack_folder_blocking(&file).is_err());
    }
}
