// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! MB128 protocol constants

/// Save command - device sends its storage image, host receives
pub const CMD_SAVE: u8 = b's';

/// Load command - host sends a storage image, device receives
pub const CMD_LOAD: u8 = b'l';

/// Size of the MB128 storage image in bytes (128 KiB, fixed)
pub const IMAGE_SIZE: usize = 131072;

/// Consecutive zero-progress I/O calls tolerated before a session is abandoned
pub const MAX_STALLS: u8 = 3;
