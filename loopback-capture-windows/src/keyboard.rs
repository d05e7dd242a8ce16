use windows::Win32::UI::Input::KeyboardAndMouse::{GetAsyncKeyState, VK_NUMLOCK, VK_SPACE};

/// Whether any key from space up to num-lock was pressed since the last poll.
///
/// Reads the low bit of `GetAsyncKeyState`, so each press is reported once.
pub fn key_pressed() -> bool {
    let mut pressed = false;
    for key in VK_SPACE.0..VK_NUMLOCK.0 {
        pressed |= unsafe { GetAsyncKeyState(key as i32) } & 0x1 != 0;
    }
    pressed
}
