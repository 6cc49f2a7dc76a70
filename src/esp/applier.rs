// Partition appliers. Firmware images go through the ESP-IDF OTA API (which
// verifies the image and flips the boot partition); filesystem images are
// written raw into the SPIFFS data partition.

use std::io::Read;

use esp_idf_svc::ota::EspOta;
use esp_idf_sys::{
    esp_partition_erase_range, esp_partition_find_first, esp_partition_t, esp_partition_write,
    esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_DATA_SPIFFS,
    esp_partition_type_t_ESP_PARTITION_TYPE_DATA,
};

use crate::applier::{Applier, PartitionTarget};
use crate::error::UpdateError;

const CHUNK_SIZE: usize = 4096;

pub struct EspApplier {
    ota: EspOta,
}

impl EspApplier {
    pub fn new() -> Result<Self, UpdateError> {
        let ota = EspOta::new().map_err(|err| UpdateError::Apply(err.to_string()))?;
        Ok(Self { ota })
    }

    fn apply_firmware(&mut self, image: &mut dyn Read) -> Result<(), UpdateError> {
        let mut update = self
            .ota
            .initiate_update()
            .map_err(|err| UpdateError::Apply(err.to_string()))?;

        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let n = fill_chunk(image, &mut buf)?;
            if n == 0 {
                break;
            }
            update
                .write(&buf[..n])
                .map_err(|err| UpdateError::Apply(err.to_string()))?;
        }

        update
            .complete()
            .map_err(|err| UpdateError::Apply(err.to_string()))?;
        Ok(())
    }

    fn apply_filesystem(&mut self, image: &mut dyn Read) -> Result<(), UpdateError> {
        let partition: *const esp_partition_t = unsafe {
            esp_partition_find_first(
                esp_partition_type_t_ESP_PARTITION_TYPE_DATA,
                esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_DATA_SPIFFS,
                core::ptr::null(),
            )
        };
        if partition.is_null() {
            return Err(UpdateError::Apply(
                "no SPIFFS data partition in partition table".to_string(),
            ));
        }
        let partition_size = unsafe { (*partition).size } as usize;

        esp_idf_sys::esp!(unsafe {
            esp_partition_erase_range(partition, 0, partition_size)
        })
        .map_err(|err| UpdateError::Apply(format!("partition erase: {err}")))?;

        let mut offset = 0usize;
        let mut buf = [0xffu8; CHUNK_SIZE];
        loop {
            let n = fill_chunk(image, &mut buf)?;
            if n == 0 {
                break;
            }
            // Flash writes must be 4-byte aligned; the tail of the buffer is
            // 0xff (erased state) so padding the final chunk is harmless.
            let write_len = (n + 3) & !3;
            if offset + write_len > partition_size {
                return Err(UpdateError::Apply(format!(
                    "filesystem image exceeds partition size {partition_size}"
                )));
            }
            esp_idf_sys::esp!(unsafe {
                esp_partition_write(partition, offset, buf.as_ptr().cast(), write_len)
            })
            .map_err(|err| UpdateError::Apply(format!("partition write: {err}")))?;
            offset += write_len;
            buf.fill(0xff);
        }

        log::info!("Wrote {offset} bytes to filesystem partition");
        Ok(())
    }
}

/// Reads until `buf` is full or the stream ends. A short final chunk is
/// returned as-is; read errors are transport failures.
fn fill_chunk(image: &mut dyn Read, buf: &mut [u8]) -> Result<usize, UpdateError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = image
            .read(&mut buf[filled..])
            .map_err(|err| UpdateError::Connect(err.to_string()))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

impl Applier for EspApplier {
    fn apply(&mut self, target: PartitionTarget, image: &mut dyn Read) -> Result<(), UpdateError> {
        match target {
            PartitionTarget::Firmware => self.apply_firmware(image),
            PartitionTarget::Filesystem => self.apply_filesystem(image),
        }
    }
}
