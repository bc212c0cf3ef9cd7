fn main() {
    formstream::run();
}
