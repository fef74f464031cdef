mod image;

use std::{
    fs::File,
    io::{self, Read as _, Write},
    path::{Path, PathBuf},
    process,
};

use clap::{CommandFactory as _, Parser, Subcommand};
use clap_num::maybe_hex;
use flash_fs::{FlashFs, Geometry, Mode, FILE_ID_NONE};
use log::{error, info};

use image::FileImage;

/// Inspect and modify a flash image through the tracker filesystem.
#[derive(Parser, Debug)]
#[command(about, author, disable_version_flag = true)]
struct Args {
    /// Print version information.
    #[arg(short = 'V', long)]
    version: bool,

    /// Flash image file, created erased if missing.
    #[arg(short, long, default_value = "flash.img")]
    image: PathBuf,

    /// Number of sectors.
    #[arg(long, default_value_t = Geometry::DEFAULT.sectors)]
    sectors: u8,

    /// Pages per sector, including the header page.
    #[arg(long, default_value_t = Geometry::DEFAULT.pages_per_sector)]
    pages_per_sector: u32,

    /// Page size in bytes.
    #[arg(long, default_value_t = Geometry::DEFAULT.page_size)]
    page_size: u32,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Erase every sector, keeping wear counters.
    Format,
    /// Append stdin (or a file) to a file.
    Write {
        #[arg(value_parser = maybe_hex::<u8>)]
        file_id: u8,
        /// Create the file; fails if it exists.
        #[arg(long)]
        create: bool,
        /// Create a circular file that recycles its oldest sector when full.
        #[arg(long, requires = "create")]
        circular: bool,
        /// User flags stored with a new file (low nibble).
        #[arg(long, value_parser = maybe_hex::<u8>)]
        user_flags: Option<u8>,
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Copy a file to stdout (or a file).
    Read {
        #[arg(value_parser = maybe_hex::<u8>)]
        file_id: u8,
        /// Bytes to skip first.
        #[arg(long, default_value_t = 0)]
        skip: u32,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show file attributes, or free space without a file id.
    Stat {
        #[arg(value_parser = maybe_hex::<u8>)]
        file_id: Option<u8>,
    },
    Protect {
        #[arg(value_parser = maybe_hex::<u8>)]
        file_id: u8,
    },
    Unprotect {
        #[arg(value_parser = maybe_hex::<u8>)]
        file_id: u8,
    },
    Delete {
        #[arg(value_parser = maybe_hex::<u8>)]
        file_id: u8,
    },
    /// List the allocation unit header of every sector.
    Sectors,
}

#[derive(Debug)]
enum Failure {
    Io(io::Error),
    Fs(flash_fs::Error),
}

impl From<io::Error> for Failure {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<flash_fs::Error> for Failure {
    fn from(error: flash_fs::Error) -> Self {
        Self::Fs(error)
    }
}

fn main() {
    pretty_env_logger::init();

    let args = Args::parse();
    if args.version {
        print_version();
        return;
    }
    let Some(command) = args.command else {
        let _ = Args::command().print_help();
        process::exit(2);
    };

    let geometry = Geometry::new(args.sectors, args.pages_per_sector, args.page_size);
    if let Err(failure) = exec(&args.image, geometry, command) {
        error!("{:?}", failure);
        let code = match failure {
            Failure::Io(_) => 1,
            Failure::Fs(error) => error.code().unsigned_abs() as i32 + 1,
        };
        process::exit(code);
    }
}

fn print_version() {
    let crate_name = clap::crate_name!();
    let crate_version = clap::crate_version!();
    println!("{} {}", crate_name, crate_version);
}

fn exec(path: &Path, geometry: Geometry, command: Command) -> Result<(), Failure> {
    let image = FileImage::open(path, geometry)?;
    let mut fs: FlashFs<FileImage> = FlashFs::new(image, geometry)?;
    fs.init(0)?;
    let volume = fs.mount(0)?;

    match command {
        Command::Format => fs.format(volume)?,
        Command::Write {
            file_id,
            create,
            circular,
            user_flags,
            input,
        } => {
            let mode = match (create, circular) {
                (false, _) => Mode::WRITE_ONLY,
                (true, false) => Mode::CREATE_NEW,
                (true, true) => Mode::CREATE_CIRCULAR,
            };
            let mut data = Vec::new();
            match input {
                Some(input) => File::open(input)?.read_to_end(&mut data)?,
                None => io::stdin().read_to_end(&mut data)?,
            };

            let handle = fs.open(volume, file_id, mode, user_flags)?;
            let mut written = 0;
            while written < data.len() {
                match fs.write(handle, &data[written..])? {
                    0 => break,
                    n => written += n,
                }
            }
            fs.close(handle)?;
            info!("wrote {} bytes to file {:#04x}", written, file_id);
        }
        Command::Read {
            file_id,
            skip,
            output,
        } => {
            let handle = fs.open(volume, file_id, Mode::READ_ONLY, None)?;
            let mut out: Box<dyn Write> = match output {
                Some(output) => Box::new(File::create(output)?),
                None => Box::new(io::stdout().lock()),
            };

            let mut at_end = false;
            if skip > 0 {
                match fs.seek(handle, skip) {
                    Ok(()) => {}
                    Err(flash_fs::Error::EndOfFile) => at_end = true,
                    Err(error) => return Err(error.into()),
                }
            }
            let mut buf = vec![0u8; geometry.page_size as usize];
            while !at_end {
                match fs.read(handle, &mut buf) {
                    Ok(n) => out.write_all(&buf[..n])?,
                    Err(flash_fs::Error::EndOfFile) => at_end = true,
                    Err(error) => return Err(error.into()),
                }
            }
            out.flush()?;
            fs.close(handle)?;
        }
        Command::Stat { file_id } => {
            let stat = fs.stat(volume, file_id.unwrap_or(FILE_ID_NONE))?;
            match file_id {
                None => println!("free: {} bytes", stat.size),
                Some(file_id) => println!(
                    "file {:#04x}: {} bytes, user flags {:#x}{}{}",
                    file_id,
                    stat.size,
                    stat.user_flags,
                    if stat.is_circular { ", circular" } else { "" },
                    if stat.is_protected { ", protected" } else { "" },
                ),
            }
        }
        Command::Protect { file_id } => fs.protect(volume, file_id)?,
        Command::Unprotect { file_id } => fs.unprotect(volume, file_id)?,
        Command::Delete { file_id } => fs.delete(volume, file_id)?,
        Command::Sectors => {
            println!("sector  file  next  flags  protect      raw     user      wear");
            for sector in 0..geometry.sectors {
                let unit = fs.unit_header(volume, sector)?;
                if unit.is_free() {
                    println!("{:6}  free{:>46}", sector, unit.wear_counter);
                    continue;
                }
                println!(
                    "{:6}  {:#04x}  {:#04x}  {:x}/{:x}    {:#04x}  {:>8} {:>8} {:>9}",
                    sector,
                    unit.file_id,
                    unit.next,
                    unit.mode_flags,
                    unit.user_flags,
                    unit.protect_bits,
                    if unit.is_sealed() { unit.raw_size as i64 } else { -1 },
                    if unit.is_sealed() { unit.user_size as i64 } else { -1 },
                    unit.wear_counter,
                );
            }
        }
    }

    fs.term(0)?;
    Ok(())
}
