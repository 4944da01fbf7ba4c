//! Cross-format pipeline tests.
//!
//! These drive the public conversion API end to end: decode one format,
//! re-encode as the other, and check that what must survive the trip does.

use image::RgbaImage;

use kanimate::convert::{self, ConvertOptions, Format, OutputFiles, Source};
use kanimate::error::KanimError;
use kanimate::kanim::{self, DumpSink};
use kanimate::model::AnimSet;
use kanimate::names::klei_hash;
use kanimate::xml;

// ============ Fixtures ============

/// A one-symbol, one-animation project: a 100x100 square sliding right
/// across three keyframes on a 33 ms grid.
fn square_scml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<spriter_data scml_version="1.0" generator="test" generator_version="v1">
    <folder id="0">
        <file id="0" name="square_0.png" width="100" height="100" pivot_x="0" pivot_y="1"/>
    </folder>
    <entity id="0" name="square">
        <animation id="0" name="idle" length="66" interval="33">
            <mainline>
                <key id="0" time="0">
                    <object_ref id="0" timeline="0" key="0" z_index="0"/>
                </key>
                <key id="1" time="33">
                    <object_ref id="0" timeline="0" key="1" z_index="0"/>
                </key>
                <key id="2" time="66">
                    <object_ref id="0" timeline="0" key="2" z_index="0"/>
                </key>
            </mainline>
            <timeline id="0" name="square_0">
                <key id="0" time="0">
                    <object folder="0" file="0" x="0" y="0" angle="0"/>
                </key>
                <key id="1" time="33">
                    <object folder="0" file="0" x="10" y="0" angle="0"/>
                </key>
                <key id="2" time="66">
                    <object folder="0" file="0" x="20" y="0" angle="0"/>
                </key>
            </timeline>
        </animation>
    </entity>
</spriter_data>
"#
    .to_string()
}

/// The square project keyed only at the ends of its 66 ms animation.
fn sparse_scml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<spriter_data scml_version="1.0" generator="test" generator_version="v1">
    <folder id="0">
        <file id="0" name="square_0.png" width="100" height="100" pivot_x="0" pivot_y="1"/>
    </folder>
    <entity id="0" name="square">
        <animation id="0" name="idle" length="66" interval="33">
            <mainline>
                <key id="0" time="0">
                    <object_ref id="0" timeline="0" key="0" z_index="0"/>
                </key>
                <key id="1" time="66">
                    <object_ref id="0" timeline="0" key="1" z_index="0"/>
                </key>
            </mainline>
            <timeline id="0" name="square_0">
                <key id="0" time="0">
                    <object folder="0" file="0" x="0" y="0" angle="0"/>
                </key>
                <key id="1" time="66">
                    <object folder="0" file="0" x="20" y="0" angle="0"/>
                </key>
            </timeline>
        </animation>
    </entity>
</spriter_data>
"#
    .to_string()
}

fn square_sprites() -> Vec<(String, RgbaImage)> {
    vec![("square_0.png".to_string(), RgbaImage::new(100, 100))]
}

fn square_source() -> Source {
    Source::Scml {
        document: square_scml(),
        sprites: square_sprites(),
    }
}

/// Converts the square project to its kanim triple.
fn square_kanim_files() -> OutputFiles {
    let mut dump = DumpSink::disabled();
    let outcome = convert::convert(
        square_source(),
        Format::Kanim,
        &ConvertOptions::default(),
        &mut dump,
    )
    .expect("project should convert to kanim");
    assert!(outcome.warnings.is_empty());
    outcome.files
}

/// Rebuilds a `Source::Kanim` from a written triple.
fn kanim_source(files: &OutputFiles, name: &str) -> Source {
    let take = |file: String| {
        files
            .get(&file)
            .unwrap_or_else(|| panic!("missing output file {file}"))
            .to_vec()
    };
    Source::Kanim {
        build: take(format!("{name}_build.bytes")),
        anim: take(format!("{name}_anim.bytes")),
        atlas: take(format!("{name}.png")),
    }
}

fn decode(files: &OutputFiles, name: &str) -> AnimSet {
    let mut dump = DumpSink::disabled();
    kanim_source(files, name)
        .read(&ConvertOptions::default(), &mut dump)
        .expect("triple should decode")
        .set
}

// ============ Binary Round Trips ============

/// Converting a project to kanim yields the three named artifacts.
#[test]
fn test_project_converts_to_kanim_triple() {
    let files = square_kanim_files();
    assert_eq!(files.len(), 3);
    let names: Vec<&str> = files.names().collect();
    assert_eq!(
        names,
        ["square.png", "square_anim.bytes", "square_build.bytes"]
    );
}

/// kanim to kanim is the identity on the decoded model and on the chunk
/// bytes themselves.
#[test]
fn test_kanim_round_trip_is_bit_identical() {
    let first = square_kanim_files();
    let set = decode(&first, "square");

    let second = kanim::write_kanim(&set).expect("set should re-encode");
    assert_eq!(
        first.get("square_build.bytes"),
        second.get("square_build.bytes")
    );
    assert_eq!(
        first.get("square_anim.bytes"),
        second.get("square_anim.bytes")
    );

    let again = decode(&second, "square");
    assert_eq!(again.build, set.build);
    assert_eq!(again.anim, set.anim);
}

/// The square fixture's symbol hash, pivot, and transforms survive the
/// binary codec.
#[test]
fn test_square_symbol_survives_binary_codec() {
    let files = square_kanim_files();
    let set = decode(&files, "square");

    assert_eq!(set.build.name, "square");
    assert_eq!(set.build.symbols.len(), 1);
    let symbol = &set.build.symbols[0];
    assert_eq!(symbol.hash, 1696137821);
    assert_eq!(symbol.hash, klei_hash("square"));
    assert_eq!(set.build_hashes[&symbol.hash], "square");

    let frame = &symbol.frames[0];
    assert_eq!(frame.pivot_x, 100.0);
    assert_eq!(frame.pivot_y, 100.0);
    assert_eq!(frame.pivot_width, 200.0);
    assert_eq!(frame.pivot_height, 200.0);

    assert_eq!(set.sprites.len(), 1);
    assert_eq!(set.sprites[0].name.to_string(), "square_0");
    assert_eq!(set.sprites[0].image.dimensions(), (100, 100));

    assert_eq!(set.anim.banks.len(), 1);
    let bank = &set.anim.banks[0];
    assert_eq!(bank.name, "idle");
    assert_eq!(bank.hash, klei_hash("idle"));
    assert_eq!(bank.frames.len(), 3);
    let m5: Vec<f32> = bank
        .frames
        .iter()
        .map(|frame| frame.elements[0].m5)
        .collect();
    assert_eq!(m5, [0.0, 20.0, 40.0]);
}

// ============ Project Round Trips ============

/// A project keeps its animation count, frame count, and resolved sprite
/// names across a trip through the binary codec.
#[test]
fn test_project_round_trip_keeps_structure() {
    let files = square_kanim_files();

    let mut dump = DumpSink::disabled();
    let outcome = convert::convert(
        kanim_source(&files, "square"),
        Format::Scml,
        &ConvertOptions::default(),
        &mut dump,
    )
    .expect("kanim should convert back to a project");
    assert!(outcome.warnings.is_empty());

    let bytes = outcome.files.get("square.scml").expect("project document");
    let text = String::from_utf8(bytes.to_vec()).expect("document is utf-8");
    let root = xml::parse_document(&text).expect("document should parse");

    let entity = root.first_child("entity").expect("entity");
    assert_eq!(entity.attr("name"), Some("square"));

    let animations: Vec<_> = entity.children_named("animation").collect();
    assert_eq!(animations.len(), 1);
    let animation = animations[0];
    assert_eq!(animation.attr("name"), Some("idle"));
    assert_eq!(animation.attr("interval"), Some("33"));
    assert_eq!(animation.attr("length"), Some("99"));

    let mainline = animation.first_child("mainline").expect("mainline");
    assert_eq!(mainline.children_named("key").count(), 3);

    let timelines: Vec<_> = animation.children_named("timeline").collect();
    assert_eq!(timelines.len(), 1);
    assert_eq!(timelines[0].attr("name"), Some("square_0_0"));
    let xs: Vec<_> = timelines[0]
        .children_named("key")
        .map(|key| key.first_child("object").expect("object").attr("x"))
        .collect();
    assert_eq!(xs, [Some("0"), Some("10"), Some("20")]);

    let folder = root.first_child("folder").expect("folder");
    let file = folder.first_child("file").expect("file entry");
    assert_eq!(file.attr("name"), Some("square_0"));
    assert_eq!(file.attr("width"), Some("100"));
    assert_eq!(file.attr("height"), Some("100"));
    assert_eq!(file.attr("pivot_x"), Some("0"));
    assert_eq!(file.attr("pivot_y"), Some("1"));

    assert!(outcome.files.get("square_0.png").is_some());
}

/// Project to kanim to project to kanim reproduces the chunk bytes.
#[test]
fn test_full_cycle_reproduces_chunk_bytes() {
    let first = square_kanim_files();

    let mut dump = DumpSink::disabled();
    let back = convert::convert(
        kanim_source(&first, "square"),
        Format::Scml,
        &ConvertOptions::default(),
        &mut dump,
    )
    .expect("kanim should convert to a project");

    let document = back.files.get("square.scml").expect("project document");
    let document = String::from_utf8(document.to_vec()).expect("document is utf-8");
    let sprite = image::load_from_memory(back.files.get("square_0.png").expect("sprite image"))
        .expect("sprite should decode")
        .to_rgba8();

    let second = convert::convert(
        Source::Scml {
            document,
            sprites: vec![("square_0.png".to_string(), sprite)],
        },
        Format::Kanim,
        &ConvertOptions::default(),
        &mut dump,
    )
    .expect("project should convert back to kanim");

    assert_eq!(
        first.get("square_build.bytes"),
        second.files.get("square_build.bytes")
    );
    assert_eq!(
        first.get("square_anim.bytes"),
        second.files.get("square_anim.bytes")
    );
}

// ============ Read Options ============

/// Sparse keyframes fill in on the running grid when interpolation is on.
#[test]
fn test_interpolate_option_fills_missing_keys() {
    let options = ConvertOptions {
        interpolate: true,
        ..Default::default()
    };
    let mut dump = DumpSink::disabled();
    let read = Source::Scml {
        document: sparse_scml(),
        sprites: square_sprites(),
    }
    .read(&options, &mut dump)
    .expect("sparse project should read with interpolation");

    let bank = &read.set.anim.banks[0];
    assert_eq!(bank.frames.len(), 3);
    let m5: Vec<f32> = bank
        .frames
        .iter()
        .map(|frame| frame.elements[0].m5)
        .collect();
    assert_eq!(m5, [0.0, 20.0, 40.0]);
}

/// The debone switch passes the document through and reports itself.
#[test]
fn test_debone_option_reports_unsupported() {
    let options = ConvertOptions {
        debone: true,
        ..Default::default()
    };
    let mut dump = DumpSink::disabled();
    let read = Source::Scml {
        document: square_scml(),
        sprites: square_sprites(),
    }
    .read(&options, &mut dump)
    .expect("read should still succeed");

    assert_eq!(read.set.anim.banks[0].frames.len(), 3);
    assert!(read
        .warnings
        .iter()
        .any(|warning| warning.message.contains("Deboning")));
}

/// A project whose images are missing converts leniently with placeholder
/// sprites and fails under strict mode.
#[test]
fn test_missing_images_strict_and_lenient() {
    let mut dump = DumpSink::disabled();
    let strict = ConvertOptions {
        strict: true,
        ..Default::default()
    };
    let result = convert::convert(
        Source::Scml {
            document: square_scml(),
            sprites: Vec::new(),
        },
        Format::Kanim,
        &strict,
        &mut dump,
    );
    assert!(matches!(result, Err(KanimError::MissingSprite(_))));

    let outcome = convert::convert(
        Source::Scml {
            document: square_scml(),
            sprites: Vec::new(),
        },
        Format::Kanim,
        &ConvertOptions::default(),
        &mut dump,
    )
    .expect("lenient conversion should succeed");
    assert!(outcome
        .warnings
        .iter()
        .any(|warning| warning.message.contains("placeholder")));
    assert_eq!(outcome.files.len(), 3);
}

// ============ Output Plumbing ============

/// A dump sink captures the binary trace during kanim reads.
#[test]
fn test_dump_sink_traces_binary_reads() {
    let files = square_kanim_files();
    let mut buffer = Vec::new();
    {
        let mut dump = DumpSink::to(&mut buffer);
        kanim_source(&files, "square")
            .read(&ConvertOptions::default(), &mut dump)
            .expect("decode with dump");
    }
    let text = String::from_utf8(buffer).expect("dump is text");
    assert!(text.contains("=== SPRITE SHEET ==="));
    assert!(text.contains("square"));
}

/// Summaries report the set-level counts the info command prints.
#[test]
fn test_summary_counts_the_set() {
    let files = square_kanim_files();
    let set = decode(&files, "square");
    let summary = set.summary();

    assert_eq!(summary.name, "square");
    assert_eq!(summary.symbols, 1);
    assert_eq!(summary.anims, 1);
    assert_eq!(summary.anim_frames, 3);
    assert_eq!(summary.sprites, 1);
}

/// Output files land on disk under the requested directory.
#[test]
fn test_save_to_dir_writes_all_artifacts() {
    let files = square_kanim_files();
    let dir = tempfile::tempdir().expect("temp dir");
    files.save_to_dir(dir.path()).expect("save should succeed");

    for name in ["square_build.bytes", "square_anim.bytes", "square.png"] {
        let path = dir.path().join(name);
        assert!(path.is_file(), "missing artifact {name}");
    }
}
