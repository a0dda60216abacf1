#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(unused)]
use std::{
    collections::HashMap,
    fs::{self, File},
    io::Write,
    path::Path,
};

use foxdocs::*;

fn main() {
    let args = CommandLineArguments::new();
    let cfg = args.config;

    // *.md arguments select converter mode; otherwise this run regenerates
    // the index.
    if (!args.md_files.is_empty()) {
        let speakers = load_speaker_map(&cfg.speaker_path());
        for f in &args.md_files {
            convert_document(f, &cfg, &speakers);
        }
        return;
    }

    write_style_css();

    // Fixed pipeline order: registries first, then the rename pass, then the
    // post-rename scan.
    let ignore = load_ignore_list(&cfg.ignore_path());
    let tag_registry = load_tag_registry(&cfg.tag_path());

    let renamed = match sanitize_directory(&cfg) {
        Err(why) => panic!("Unable to sanitize {}: {}", cfg.docs_dir, why),
        Ok(r) => r,
    };
    for (old, new) in &renamed {
        println!("Renamed: {} -> {}", old, new);
    }

    let docs = collect_docs(&cfg, &ignore, &tag_registry);
    for d in &docs {
        println!("Found: {}", d.get_filename());
    }

    let known_tags = all_tags(&tag_registry);
    let html = generate_listing(&docs, &known_tags, &cfg);
    write_output(&cfg.output_file, &html);
    println!("Generated {} with {} documents", cfg.output_file, docs.len());
}

pub fn convert_document(input: &str, cfg: &IndexConfig, speakers: &HashMap<String, String>) {
    let contents = fs::read_to_string(input)
        .expect(format!("Unable to read or find file: {}", input).as_str());
    let meta = DOC_META::parse(&contents);
    let dmd = DMD::new()
        .set_filename(input)
        .set_meta(meta)
        .set_speakers(speakers.to_owned())
        .pre_scan(contents.as_str())
        .parse_blocks();

    // Converted output lands in the docs dir, where the next index run
    // picks it up.
    let stem = dmd.get_filename();
    let stem = match stem.rfind('/') {
        Some(i) => stem[i + 1..].to_owned(),
        None => stem,
    };
    match fs::create_dir_all(&cfg.docs_dir) {
        Err(why) => panic!("Unable to create {}: {}", cfg.docs_dir, why),
        Ok(_) => {}
    }
    let out_path = Path::new(&cfg.docs_dir).join(format!("{}.html", stem));
    write_output(
        out_path.display().to_string().as_str(),
        &dmd.render_document(),
    );
    println!("Converted {} -> {}", input, out_path.display());
}

pub fn write_style_css() {
    write_output("style.css", STYLE_CSS);
}

pub fn write_output(file_name: &str, contents: &str) {
    let path = Path::new(file_name);
    let display = path.display();

    let mut file = match File::create(&path) {
        Err(why) => panic!("Unable to create {}: {}", display, why),
        Ok(file) => file,
    };

    match file.write_all(contents.as_bytes()) {
        Err(why) => panic!("Unable to write {}: {}", display, why),
        Ok(_) => println!("Successfully wrote {}", display),
    }
}
