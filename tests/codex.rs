use iffcodex_lib::prelude::*;
use std::fs;

fn create_test_aiff() -> Vec<u8> {
    let mut tree = Tree::new();
    let form = tree.form("AIFF");

    let comm = CommonChunk::new(2, 3, 16, 44100.0).unwrap();
    // 3 stereo frames of 16 bit samples
    let ssnd = SoundDataChunk::new(0, 0, &[0u8; 12]).unwrap();
    tree.push(form, Item::Extension(Box::new(comm))).unwrap();
    tree.push(form, Item::Extension(Box::new(ssnd))).unwrap();
    tree.push(form, TextChunk::new("(c) ", "2024 nobody").chunk().clone())
        .unwrap();
    tree.to_bytes(form).unwrap()
}

#[test]
fn test_open_decodes_aiff_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.aif");
    fs::write(&path, create_test_aiff()).unwrap();

    let c = Codex::open(path.to_str().unwrap()).unwrap();
    assert_eq!(c.get_filename(), "tone.aif");
    assert_eq!(c.codec().file_extension(), "aif");

    let root = c.root().unwrap();
    let kids = c.tree.to_array(root).unwrap();
    assert_eq!(kids.len(), 3);

    let comm = c.tree.extension::<CommonChunk>(kids[0]).unwrap();
    assert_eq!(comm.num_channels(), 2);
    assert_eq!(comm.num_sample_frames(), 3);
    assert_eq!(comm.sample_size(), 16);
    assert_eq!(comm.sample_rate(), 44100.0);

    let ssnd = c.tree.extension::<SoundDataChunk>(kids[1]).unwrap();
    assert_eq!(ssnd.sound_data().len(), 12);

    let copyright = c.tree.extension::<TextChunk>(kids[2]).unwrap();
    assert_eq!(copyright.text(), "2024 nobody");
}

#[test]
fn test_export_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.aiff");
    let output = dir.path().join("out.aiff");
    let bytes = create_test_aiff();
    fs::write(&input, &bytes).unwrap();

    let c = Codex::open(input.to_str().unwrap()).unwrap();
    assert_eq!(c.to_bytes().unwrap(), bytes);
    c.export(output.to_str().unwrap()).unwrap();
    assert_eq!(fs::read(&output).unwrap(), bytes);
}

#[test]
fn test_rewrite_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.aifc");
    let bytes = create_test_aiff();
    fs::write(&path, &bytes).unwrap();

    rewrite(path.to_str().unwrap()).unwrap();
    assert_eq!(fs::read(&path).unwrap(), bytes);
}

#[test]
fn test_generic_files_and_failures() {
    let dir = tempfile::tempdir().unwrap();

    let missing = dir.path().join("missing.aif");
    assert!(Codex::open(missing.to_str().unwrap()).is_err());

    let wave = dir.path().join("not.aif");
    fs::write(&wave, b"RIFF\0\0\0\x04WAVE").unwrap();
    assert!(Codex::open(wave.to_str().unwrap()).is_err());

    let generic = dir.path().join("song.iff");
    fs::write(&generic, create_test_aiff()).unwrap();
    let c = Codex::open(generic.to_str().unwrap()).unwrap();
    let root = c.root().unwrap();
    let first = c.tree.children(root).unwrap()[0];
    assert!(c.tree.extension::<CommonChunk>(first).is_none());
    assert_eq!(c.tree.id(first).unwrap(), "COMM");

    let json = c.describe_json().unwrap();
    assert_eq!(json["type"], "AIFF");
    assert_eq!(json["children"][0]["size"], 18);
}
