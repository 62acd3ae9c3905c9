use std::sync::Mutex;

use serde::Serialize;

use crate::emulator::Emulator;

const DISPLAY_WORDS: usize = 0x200000;
const REGION_COUNT: usize = 8200;

/// Pixel memory plus the 16x16 dirty-region bitmap. Shared with external
/// consumers through an `Arc`; every access holds the mutex.
pub struct VirtualDisplay {
    state: Mutex<DisplayState>,
}

struct DisplayState {
    data: Vec<u32>,
    update_regions: Vec<bool>,
    width: usize,
    height: usize,
    shape_params: [u32; 4],
    writes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisplayUpdate {
    pub region_x: usize,
    pub region_y: usize,
    pub data: Vec<u32>,
}

impl Default for VirtualDisplay {
    fn default() -> Self {
        VirtualDisplay {
            state: Mutex::new(DisplayState {
                data: vec![0; DISPLAY_WORDS],
                update_regions: vec![false; REGION_COUNT],
                width: 0,
                height: 0,
                shape_params: [0; 4],
                writes: 0,
            }),
        }
    }
}

impl VirtualDisplay {
    /// Dirty 16x16 regions since the last poll; polling clears them.
    pub fn updates(&self) -> Vec<DisplayUpdate> {
        let mut state = self.state.lock().unwrap();
        state.collect_regions(true)
    }

    pub fn entire_screen(&self) -> Vec<DisplayUpdate> {
        let mut state = self.state.lock().unwrap();
        state.collect_regions(false)
    }

    pub fn size(&self) -> (usize, usize) {
        let state = self.state.lock().unwrap();
        (state.width, state.height)
    }

    pub fn write_count(&self) -> u64 {
        self.state.lock().unwrap().writes
    }

    pub(crate) fn set_width(&self, width: usize) {
        self.state.lock().unwrap().width = width;
    }

    pub(crate) fn set_height(&self, height: usize) {
        self.state.lock().unwrap().height = height;
    }

    pub(crate) fn set_shape_param(&self, index: usize, value: u32) {
        self.state.lock().unwrap().shape_params[index] = value;
    }

    pub(crate) fn shape_param(&self, index: usize) -> u32 {
        self.state.lock().unwrap().shape_params[index]
    }

    pub(crate) fn read_pixel_word(&self, offset: usize) -> u32 {
        let state = self.state.lock().unwrap();
        state.data.get(offset).copied().unwrap_or(0)
    }

    pub(crate) fn write_pixel_word(&self, offset: usize, bitmask: u32, shifted: u32) {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        let region = state.region_of(offset);
        if let Some(px) = state.data.get_mut(offset) {
            *px = (*px & !bitmask) | (shifted & bitmask);
        }
        if let Some(r) = region {
            state.update_regions[r] = true;
        }
    }

    pub(crate) fn draw_filled_rectangle(&self, color: u32) {
        let mut state = self.state.lock().unwrap();
        let [x, y, w, h] = state.shape_params;
        let width = state.width;
        for oy in 0..h as usize {
            for ox in 0..w as usize {
                let idx = (y as usize + oy) * width + (x as usize + ox);
                if let Some(px) = state.data.get_mut(idx) {
                    *px = color;
                }
            }
        }
    }
}

impl DisplayState {
    fn region_of(&self, data_offset: usize) -> Option<usize> {
        if self.width == 0 {
            return None;
        }
        let regions_per_row = (self.width + 15) / 16;
        let x = (data_offset % self.width) / 16;
        let y = (data_offset / self.width) / 16;
        let region = y * regions_per_row + x;
        (region < self.update_regions.len()).then_some(region)
    }

    fn collect_regions(&mut self, dirty_only: bool) -> Vec<DisplayUpdate> {
        let regions_per_row = (self.width + 15) / 16;
        let mut updates = Vec::new();
        let mut y = 0;
        while y < self.height {
            let mut x = 0;
            while x < self.width {
                let region = (y >> 4) * regions_per_row + (x >> 4);
                let dirty = self.update_regions.get(region).copied().unwrap_or(false);
                if !dirty_only || dirty {
                    let mut out = vec![0u32; 16 * 16];
                    for oy in 0..16 {
                        for ox in 0..16 {
                            let idx = (y + oy) * self.width + (x + ox);
                            out[oy * 16 + ox] = self.data.get(idx).copied().unwrap_or(0);
                        }
                    }
                    updates.push(DisplayUpdate { region_x: x, region_y: y, data: out });
                    if let Some(flag) = self.update_regions.get_mut(region) {
                        *flag = false;
                    }
                }
                x += 16;
            }
            y += 16;
        }
        updates
    }
}

/// Read-only filesystem image mapped above the framebuffer.
#[derive(Debug, Clone, Default)]
pub struct VirtualFileSystem {
    pub data: Vec<u32>,
}

// ----------------------------------------------------------------------------
// Reserved-window dispatch
//
// Offsets from 0x80000000:
//   0x0000..0x2FEB  reserved, faults
//   0x2FEC          shape draw color (the write performs the draw)
//   0x2FF0..0x2FFF  shape draw parameters 0..3
//   0x3000          OS ecall handler entry
//   0x3004          stdout pipe, write-only
//   0x3008/0x300C   display width/height
//   0x3010          OS interrupt handler entry
//   0x3014          random seed, read-only
//   0x3018          solution correctness sink, OS-only write
//   0x301C          current interrupt id
//   0x3020..0xFFFF  interrupt data, read-only
//   0x10000..0x7FFFFF framebuffer
//   0x800000..      filesystem image, read-only

impl Emulator {
    pub(crate) fn mem_read_reserved(&mut self, addr: u32) -> u32 {
        let addr = addr & 0x7FFF_FFFF;

        if addr < 0x2FF0 {
            // the draw-color trigger at 0x2FEC is write-only
            self.exception_segmentation_fault(addr);
            0
        } else if addr < 0x3000 {
            self.display.shape_param(((addr - 0x2FF0) >> 2) as usize)
        } else if addr < 0x3020 {
            match addr {
                0x3000 => self.os_entry,
                0x3008 => {
                    let (w, _) = self.display.size();
                    w as u32
                }
                0x300C => {
                    let (_, h) = self.display.size();
                    h as u32
                }
                0x3010 => self.os_interrupt_entry,
                0x3014 => self.random_seed,
                0x301C => match &self.interrupt {
                    Some(interrupt) => interrupt.id,
                    None => 0,
                },
                _ => {
                    // the stdout pipe and correctness sink are write-only
                    self.exception_segmentation_fault(addr);
                    0
                }
            }
        } else if addr < 0x10000 {
            let offset = addr - 0x3020;
            match &self.interrupt {
                Some(interrupt) if ((offset >> 2) as usize) < interrupt.data.len() => {
                    interrupt.data[(offset >> 2) as usize]
                }
                _ => {
                    self.exception_segmentation_fault(addr);
                    0
                }
            }
        } else if addr < 0x0080_0000 {
            let offset = addr - 0x10000;
            self.display.read_pixel_word((offset >> 2) as usize)
        } else {
            let offset = addr - 0x0080_0000;
            match &self.fs {
                Some(fs) if ((offset >> 2) as usize) < fs.data.len() => {
                    fs.data[(offset >> 2) as usize]
                }
                _ => {
                    self.exception_segmentation_fault(addr);
                    0
                }
            }
        }
    }

    pub(crate) fn mem_write_reserved(&mut self, addr: u32, bitmask: u32, value: u32) {
        let addr = addr & 0x7FFF_FFFF;

        if addr < 0x2FEC {
            self.exception_segmentation_fault(addr);
        } else if addr < 0x3020 {
            match addr & 0xFFFF_FFFC {
                0x2FEC => self.display.draw_filled_rectangle(value),
                0x2FF0 => self.display.set_shape_param(0, value),
                0x2FF4 => self.display.set_shape_param(1, value),
                0x2FF8 => self.display.set_shape_param(2, value),
                0x2FFC => self.display.set_shape_param(3, value),
                0x3000 => self.os_entry = value,
                0x3004 => {
                    if let Some(cb) = self.stdout_callback.as_mut() {
                        cb(value as u8);
                    }
                }
                0x3008 => self.display.set_width(value as usize),
                0x300C => self.display.set_height(value as usize),
                0x3010 => self.os_interrupt_entry = value,
                0x3018 => {
                    // only OS code may report correctness
                    if !self.profiling_at(self.pc) {
                        self.solution_validity = value;
                    } else {
                        self.exception_segmentation_fault(addr);
                    }
                }
                _ => self.exception_segmentation_fault(addr),
            }
        } else if addr < 0x10000 {
            // interrupt data is read-only
            self.exception_segmentation_fault(addr);
        } else if addr < 0x0080_0000 {
            let offset = addr - 0x10000;
            self.display.write_pixel_word(
                (offset >> 2) as usize,
                bitmask,
                value << ((addr & 0x3) * 8),
            );
        } else {
            // filesystem image is read-only
            self.exception_segmentation_fault(addr);
        }
    }
}
