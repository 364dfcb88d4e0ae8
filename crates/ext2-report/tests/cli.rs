use std::io::Write;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::NamedTempFile;

const BLOCK_SIZE: usize = 1024;

/// One group of 64 one-KiB blocks and 8 inodes. Descriptor table in block 2,
/// bitmaps in blocks 3 and 4, inode table in block 5. Blocks 1 to 5 and every
/// inode are marked used; all inode records are empty.
struct Image {
    bytes: Vec<u8>,
}

impl Image {
    fn minimal() -> Self {
        let mut image = Self {
            bytes: vec![0; 64 * BLOCK_SIZE],
        };
        image.superblock_u32(0, 8);
        image.superblock_u32(4, 64);
        image.superblock_u32(20, 1);
        image.superblock_u32(24, 0);
        image.superblock_u32(32, 8192);
        image.superblock_u32(40, 8);
        image.bytes[1024 + 56..1024 + 58].copy_from_slice(&0xEF53_u16.to_le_bytes());
        image.superblock_u32(76, 1);
        image.superblock_u32(84, 11);
        image.bytes[1024 + 88..1024 + 90].copy_from_slice(&128_u16.to_le_bytes());

        image.descriptor(0, [3, 4, 5]);
        image.bytes[3 * BLOCK_SIZE] = 0b0001_1111;
        image.bytes[4 * BLOCK_SIZE] = 0xFF;
        image
    }

    fn superblock_u32(&mut self, offset: usize, value: u32) {
        let start = 1024 + offset;
        self.bytes[start..start + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn descriptor(&mut self, group: usize, blocks: [u32; 3]) {
        let start = 2 * BLOCK_SIZE + group * 32;
        for (index, block) in blocks.into_iter().enumerate() {
            let field = start + index * 4;
            self.bytes[field..field + 4].copy_from_slice(&block.to_le_bytes());
        }
    }

    fn write(&self) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&self.bytes).unwrap();
        file.flush().unwrap();
        file
    }
}

fn report(args: &[&Path]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ext2-report"))
        .args(args)
        .output()
        .unwrap()
}

fn report_image(image: &Image) -> Output {
    let file = image.write();
    report(&[file.path()])
}

fn audit(transcript: &[u8]) -> Output {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(transcript).unwrap();
    file.flush().unwrap();
    Command::new(env!("CARGO_BIN_EXE_ext2-audit"))
        .arg(file.path())
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).unwrap()
}

#[test]
fn wrong_argument_count() {
    let output = report(&[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Usage"));

    let file = Image::minimal().write();
    let output = report(&[file.path(), file.path()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
}

#[test]
fn missing_image() {
    let dir = tempfile::tempdir().unwrap();
    let output = report(&[dir.path().join("absent.img").as_path()]);
    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
}

#[test]
fn full_transcript_of_a_small_image() {
    let output = report_image(&Image::minimal());
    assert_eq!(output.status.code(), Some(0));

    let text = stdout(&output);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "SUPERBLOCK,64,8,1024,128,8192,8,11");
    assert_eq!(lines[1], "GROUP,0,64,8,0,0,3,4,5");
    assert_eq!(lines[2], "BFREE,6");
    assert_eq!(lines.last(), Some(&"BFREE,64"));
    assert_eq!(lines.len(), 2 + 59);
    assert!(text.ends_with('\n'));
}

#[test]
fn unsupported_block_size_prints_nothing() {
    let mut image = Image::minimal();
    image.superblock_u32(24, 20);
    let output = report_image(&image);
    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
    assert!(!output.stderr.is_empty());
}

#[test]
fn oversized_groups_are_rejected() {
    let mut image = Image::minimal();
    image.superblock_u32(0, 0xF000_0000);
    image.superblock_u32(40, 0xF000_0000);
    let output = report_image(&image);
    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
}

#[test]
fn read_past_the_image_keeps_whole_lines() {
    let mut image = Image::minimal();
    image.superblock_u32(4, u32::MAX);
    image.superblock_u32(0, 8 * u32::MAX.div_ceil(8192));
    image.descriptor(1, [1000, 4, 5]);
    let output = report_image(&image);
    assert_eq!(output.status.code(), Some(2));

    let text = stdout(&output);
    assert!(text.starts_with("SUPERBLOCK,"));
    assert!(text.ends_with('\n'));
    assert!(text.lines().any(|line| line.starts_with("GROUP,1,")));
}

#[test]
fn transcript_of_a_clean_image_audits_clean() {
    let transcript = report_image(&Image::minimal()).stdout;

    let output = audit(&transcript);
    assert_eq!(output.status.code(), Some(0));
    assert!(output.stdout.is_empty());
}

#[test]
fn audit_reports_unreferenced_blocks() {
    let mut image = Image::minimal();
    // Blocks 6 and 7 used, but no inode points at them.
    image.bytes[3 * BLOCK_SIZE] = 0b0111_1111;
    let transcript = report_image(&image).stdout;

    let output = audit(&transcript);
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(
        stdout(&output),
        "UNREFERENCED BLOCK 6\nUNREFERENCED BLOCK 7\n"
    );
}

#[test]
fn audit_rejects_unusable_transcripts() {
    let output = audit(b"SUPERBLOCK,64,8,1024,128,8192,8,11\nnot a record\n");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("line 2"));

    // Parses, but has no SUPERBLOCK record.
    let output = audit(b"BFREE,6\n");
    assert_eq!(output.status.code(), Some(1));

    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.csv");
    let output = Command::new(env!("CARGO_BIN_EXE_ext2-audit"))
        .arg(&missing)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(!missing.exists());
}
