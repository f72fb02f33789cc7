fn main() {
    println!("cargo:rerun-if-changed=proto/Mumble.proto");

    protobuf_codegen_pure::Codegen::new()
        .out_dir(std::env::var("OUT_DIR").unwrap())
        .input("proto/Mumble.proto")
        .include("proto")
        .run()
        .expect("failed to compile Mumble.proto");
}
