use enginebridge::prelude::*;

fn main() {
    let mut frame = Frame::new();
    frame.push(1i64);
    std::thread::spawn(move || {
        frame.push(2i64);
    });
}
