#![forbid(unsafe_code)]

fn main() {
    // Build metadata logged by the server at startup.
    build_data::set_GIT_BRANCH();
    build_data::set_GIT_COMMIT_SHORT();
    build_data::set_GIT_DIRTY();
    build_data::set_SOURCE_TIMESTAMP();  // BUILD_TIMESTAMP would make builds unreproducible.
    build_data::set_RUSTC_VERSION();
}
