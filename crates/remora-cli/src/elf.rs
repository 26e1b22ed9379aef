//! ELF glue for the analyzer collaborators.
//!
//! Reads the debuggee's object file once and serves the analyzer's
//! [`BinaryInfo`] and [`SymbolProvider`] seams from the extracted
//! symbol table, rebased by the module's load slide.

use std::path::Path;

use goblin::elf::header::ET_DYN;
use goblin::elf::sym::STT_FUNC;
use goblin::elf::Elf;
use miette::IntoDiagnostic;

use remora_analyzer::{BinaryInfo, SymbolKind, SymbolProvider, SymbolRecord};
use remora_debugger::{Address, Region};

/// Facts extracted from the debuggee's executable.
#[derive(Debug)]
pub struct ElfImage {
    entry: Address,
    main: Option<Address>,
    functions: Vec<(String, Address, u64)>,
    position_independent: bool,
    slide: Address,
}

impl ElfImage {
    /// Parses the executable at `path` and extracts the facts the
    /// analyzer consumes. Nothing borrowed from the file survives.
    pub fn load(path: &Path) -> miette::Result<Self> {
        let data = std::fs::read(path).into_diagnostic()?;
        let elf = Elf::parse(&data).into_diagnostic()?;

        let mut functions = Vec::new();
        let mut main = None;

        let mut collect = |syms: &goblin::elf::sym::Symtab<'_>, strtab: &goblin::strtab::Strtab<'_>| {
            for sym in syms.iter() {
                if sym.st_type() != STT_FUNC || sym.st_value == 0 {
                    continue;
                }

                let Some(name) = strtab.get_at(sym.st_name) else {
                    continue;
                };

                if name == "main" {
                    main = Some(sym.st_value);
                }

                functions.push((name.to_owned(), sym.st_value, sym.st_size));
            }
        };

        collect(&elf.syms, &elf.strtab);
        collect(&elf.dynsyms, &elf.dynstrtab);

        Ok(Self {
            entry: elf.header.e_entry,
            main,
            functions,
            position_independent: elf.header.e_type == ET_DYN,
            slide: 0,
        })
    }

    /// Rebases every address by the module's runtime load base.
    ///
    /// A fixed-position executable ignores the slide.
    pub fn with_slide(mut self, module_base: Address) -> Self {
        if self.position_independent {
            self.slide = module_base;
        }

        self
    }
}

impl BinaryInfo for ElfImage {
    fn entry_point(&self) -> Option<Address> {
        Some(self.entry + self.slide)
    }

    fn main_symbol(&self) -> Option<Address> {
        self.main.map(|addr| addr + self.slide)
    }
}

impl SymbolProvider for ElfImage {
    fn lookup_in(&self, region: &Region) -> Vec<SymbolRecord> {
        self.functions
            .iter()
            .map(|(name, addr, size)| SymbolRecord {
                name: name.clone(),
                address: addr + self.slide,
                size: *size,
                kind: SymbolKind::Function,
            })
            .filter(|record| region.contains(record.address))
            .collect()
    }
}
