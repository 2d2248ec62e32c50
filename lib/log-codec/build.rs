fn main() {
    std::env::set_var("PROTOC", protobuf_src::protoc());
    prost_build::compile_protos(&["proto/log_entry.proto"], &["proto/"])
        .expect("failed to compile log_entry.proto");
}
